//! Session Orchestrator - search → paginate → extract → filter → persist
//!
//! One logical worker drives the loop; a background `InterruptMonitor`
//! owns the gate. Every step that touches the page first waits for the gate
//! to clear. Each page is flushed before moving on, and every exit path
//! (success, failure, cancellation) runs the same teardown: final flush,
//! monitor shutdown, gate close, store close.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{PageController, SessionReport, Source};
use crate::error::{RetryError, SessionError};
use crate::filter::{FilterEngine, FilterRule};
use crate::gate::{InterruptGate, InterruptMonitor};
use crate::record::SearchRequest;
use crate::retry::RetryPolicy;
use crate::store::{DurableStore, FallbackSink, FlushOutcome, RecordStore};

/// Tunables for one session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Maximum pages per search (`None` = follow pagination to the end)
    pub page_ceiling: Option<u32>,
    /// How many times a page may be re-listed after a record exhausts its retries
    pub page_attempts: u32,
    /// Retry policy for every page-controller step
    pub retry: RetryPolicy,
    /// Longest a single wait on the interrupt gate may last
    pub interrupt_timeout: Option<Duration>,
    /// Interrupt monitor poll cadence
    pub monitor_interval: Duration,
    /// Pause after searching and paginating
    pub settle_delay: Duration,
    /// Re-stage records left in fallback files by earlier sessions
    pub recover_fallback: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            page_ceiling: None,
            page_attempts: 2,
            retry: RetryPolicy::default(),
            interrupt_timeout: None,
            monitor_interval: Duration::from_secs(1),
            settle_delay: Duration::from_secs(5),
            recover_fallback: false,
        }
    }
}

impl SessionSettings {
    pub fn with_page_ceiling(mut self, ceiling: Option<u32>) -> Self {
        self.page_ceiling = ceiling;
        self
    }

    pub fn with_page_attempts(mut self, attempts: u32) -> Self {
        self.page_attempts = attempts;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_interrupt_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.interrupt_timeout = timeout;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval = interval;
        self
    }

    pub fn with_recover_fallback(mut self, recover: bool) -> Self {
        self.recover_fallback = recover;
        self
    }
}

/// Everything a session needs from configuration, resolved up front
#[derive(Debug, Clone)]
pub struct SessionPlan {
    /// Collection the records belong to; also the fallback namespace
    pub collection: String,
    pub searches: Vec<SearchRequest>,
    pub filters: Vec<FilterRule>,
    pub settings: SessionSettings,
}

/// How a page ended
enum PageOutcome {
    Complete,
    /// A record exhausted its retries; the rest of the page was skipped
    Aborted(RetryError),
}

/// Why pagination stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PageEnd {
    LastPage,
    Ceiling,
}

enum PageTransition {
    Advanced,
    Exhausted(PageEnd),
}

pub struct SessionOrchestrator {
    source: Arc<dyn Source>,
    page: Arc<dyn PageController>,
    store: RecordStore,
    filters: FilterEngine,
    searches: Vec<SearchRequest>,
    settings: SessionSettings,
    gate: InterruptGate,
    report: SessionReport,
}

impl SessionOrchestrator {
    pub fn new(
        plan: SessionPlan,
        source: Arc<dyn Source>,
        page: Arc<dyn PageController>,
        store: Arc<dyn DurableStore>,
        sink: Arc<dyn FallbackSink>,
    ) -> Result<Self, SessionError> {
        let filters = FilterEngine::new(&plan.filters)?;
        let store = RecordStore::new(store, sink, plan.collection.clone());
        let gate = InterruptGate::new().with_max_wait(plan.settings.interrupt_timeout);
        let report = SessionReport::new(source.name());

        Ok(Self {
            source,
            page,
            store,
            filters,
            searches: plan.searches,
            settings: plan.settings,
            gate,
            report,
        })
    }

    /// Shared handle to this session's interrupt gate
    pub fn gate(&self) -> InterruptGate {
        self.gate.clone()
    }

    /// Run every search to completion, or until `cancel` fires or a fatal
    /// error occurs. Staged records are flushed on every exit path.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<SessionReport, SessionError> {
        info!(
            "Session {} starting for {} into {} ({} searches, {} filters)",
            self.report.session_id,
            self.source.name(),
            self.store.collection(),
            self.searches.len(),
            self.filters.len()
        );

        if let Err(e) = self.store.connect().await {
            error!("{}", e);
            self.store.close().await;
            return Err(e.into());
        }

        let monitor = self.source.interrupt_selector().map(|selector| {
            InterruptMonitor::new(
                self.gate.clone(),
                Arc::clone(&self.page),
                selector,
                self.settings.monitor_interval,
            )
            .spawn(cancel.child_token())
        });

        let result = tokio::select! {
            result = self.execute() => result,
            _ = cancel.cancelled() => Err(SessionError::Cancelled),
        };

        let result = match result {
            Ok(()) => self.flush().await.map(|_| ()),
            Err(err) => {
                error!("Session {} failed: {}", self.report.session_id, err);
                if let Err(flush_err) = self.flush().await {
                    error!("Final flush failed: {}", flush_err);
                }
                Err(err)
            }
        };

        if let Some(monitor) = monitor {
            monitor.shutdown().await;
        }
        self.gate.close();
        self.store.close().await;
        self.report.finish(self.store.totals());

        info!(
            "Session {} finished in {}: {} searches, {} pages, {} staged, {} filtered out, {} already known",
            self.report.session_id,
            humantime::format_duration(Duration::from_secs_f64(self.report.duration_seconds.round())),
            self.report.searches,
            self.report.pages,
            self.report.staged,
            self.report.filtered_out,
            self.report.known
        );

        result.map(|()| self.report)
    }

    async fn execute(&mut self) -> Result<(), SessionError> {
        self.gate.await_clear().await?;
        let login = self
            .source
            .setup(self.page.as_ref())
            .await
            .map_err(SessionError::Authentication)?;
        self.report.login_state = Some(login);
        debug!("Source {} ready ({:?})", self.source.name(), login);

        if self.settings.recover_fallback {
            match self.store.recover_pending().await {
                Ok(recovered) => {
                    self.report.recovered = recovered;
                    self.flush().await?;
                }
                Err(e) => warn!("{}", e),
            }
        }

        let searches = self.searches.clone();
        for (index, search) in searches.iter().enumerate() {
            info!(
                "[{} of {}] Searching: {}",
                index + 1,
                searches.len(),
                search
            );
            self.run_search(search).await?;
        }
        Ok(())
    }

    async fn run_search(&mut self, search: &SearchRequest) -> Result<(), SessionError> {
        self.gate.await_clear().await?;

        let source = self.source.as_ref();
        let page = self.page.as_ref();
        let has_results = self
            .settings
            .retry
            .execute(&format!("search {}", search), &self.gate, || {
                source.search(page, search)
            })
            .await
            .map_err(|e| gated_or("search", e))?;
        self.report.searches += 1;
        self.settle().await;

        if !has_results {
            debug!("No results for {}", search);
            return Ok(());
        }

        let mut page_number = 1;
        loop {
            self.run_page(search, page_number).await?;
            match self.next_page(page_number).await? {
                PageTransition::Advanced => page_number += 1,
                PageTransition::Exhausted(end) => {
                    debug!("Pagination for {} ended at page {} ({:?})", search, page_number, end);
                    return Ok(());
                }
            }
        }
    }

    /// Process one page, re-listing it when a record exhausts its retries.
    async fn run_page(&mut self, search: &SearchRequest, page_number: u32) -> Result<(), SessionError> {
        let attempts = self.settings.page_attempts.max(1);

        for attempt in 1..=attempts {
            let outcome = self.process_page(page_number, attempt).await?;
            self.flush().await?;

            match outcome {
                PageOutcome::Complete => return Ok(()),
                PageOutcome::Aborted(err) if attempt == attempts => {
                    return Err(SessionError::PageRetriesExhausted {
                        search: search.to_string(),
                        page: page_number,
                        attempts,
                        source: err,
                    });
                }
                PageOutcome::Aborted(err) => {
                    self.report.page_retries += 1;
                    warn!(
                        "Page {} aborted ({}), re-listing (attempt {} of {})",
                        page_number,
                        err,
                        attempt + 1,
                        attempts
                    );
                }
            }
        }

        Ok(())
    }

    async fn process_page(
        &mut self,
        page_number: u32,
        attempt: u32,
    ) -> Result<PageOutcome, SessionError> {
        self.gate.await_clear().await?;

        let source = Arc::clone(&self.source);
        let page = Arc::clone(&self.page);
        let (source, page) = (source.as_ref(), page.as_ref());

        let handles = self
            .settings
            .retry
            .execute("list records", &self.gate, || source.list_records(page))
            .await
            .map_err(|e| gated_or("list records", e))?;

        if attempt == 1 {
            self.report.pages += 1;
        }
        let total = handles.len();
        info!("Page {} | {} results", page_number, total);

        for (index, handle) in handles.iter().enumerate() {
            let position = index + 1;
            self.report.records_seen += 1;

            match self.store.exists(&handle.id).await {
                Ok(true) => {
                    self.report.known += 1;
                    info!("[{} of {}] {} already extracted", position, total, handle.id);
                    continue;
                }
                Ok(false) => {}
                // The upsert is keyed by id, so a duplicate write is harmless.
                Err(e) => warn!("{}; treating {} as new", e, handle.id),
            }

            self.gate.await_clear().await?;
            let extracted = self
                .settings
                .retry
                .execute(&format!("extract {}", handle.id), &self.gate, || {
                    source.extract_record(page, handle)
                })
                .await;

            let record = match extracted {
                Ok(record) => record,
                Err(RetryError::Interrupted { source: gate, .. }) => return Err(gate.into()),
                Err(err) => {
                    self.report.extraction_failures += 1;
                    error!("[{} of {}] {}", position, total, err);
                    return Ok(PageOutcome::Aborted(err));
                }
            };

            if !self.filters.accepts(&record) {
                self.report.filtered_out += 1;
                info!("[{} of {}] {} discarded by filters", position, total, record.id);
                continue;
            }

            let summary = format!(
                "{}: {}",
                record.title.as_deref().unwrap_or("<untitled>"),
                record.url.as_deref().unwrap_or(&record.id)
            );
            if self.store.stage(record) {
                self.report.staged += 1;
                info!("[{} of {}] {}", position, total, summary);
            }
        }

        Ok(PageOutcome::Complete)
    }

    async fn next_page(&mut self, page_number: u32) -> Result<PageTransition, SessionError> {
        if let Some(ceiling) = self.settings.page_ceiling {
            if page_number >= ceiling {
                return Ok(PageTransition::Exhausted(PageEnd::Ceiling));
            }
        }

        self.gate.await_clear().await?;
        let source = self.source.as_ref();
        let page = self.page.as_ref();

        let has_next = self
            .settings
            .retry
            .execute("check next page", &self.gate, || source.has_next_page(page))
            .await
            .map_err(|e| gated_or("check next page", e))?;
        if !has_next {
            return Ok(PageTransition::Exhausted(PageEnd::LastPage));
        }

        self.settings
            .retry
            .execute("advance page", &self.gate, || source.advance_page(page))
            .await
            .map_err(|e| gated_or("advance page", e))?;
        self.settle().await;

        Ok(PageTransition::Advanced)
    }

    async fn flush(&mut self) -> Result<FlushOutcome, SessionError> {
        let outcome = self.store.flush().await?;
        self.report.record_flush(&outcome);

        match &outcome {
            FlushOutcome::Empty => {}
            FlushOutcome::Persisted { inserted, updated } => {
                debug!("Flushed page: {} inserted, {} updated", inserted, updated)
            }
            FlushOutcome::FellBack { written, reason } => warn!(
                "Store rejected the batch ({}); {} records kept in fallback files",
                reason, written
            ),
        }
        Ok(outcome)
    }

    async fn settle(&self) {
        if !self.settings.settle_delay.is_zero() {
            self.page.sleep(self.settings.settle_delay).await;
        }
    }
}

/// Gate failures keep their own identity; anything else is a failed source step.
fn gated_or(step: &'static str, err: RetryError) -> SessionError {
    match err {
        RetryError::Interrupted { source, .. } => source.into(),
        exhausted => SessionError::source_step(step, exhausted.into()),
    }
}
