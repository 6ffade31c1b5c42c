//! Scripted fakes shared by the integration tests

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use jobot::{
    DurableStore, Element, FilterRule, LoginState, PageController, Record, RecordHandle,
    SearchRequest, SessionPlan, SessionSettings, Source, UpsertOp, UpsertOutcome,
};

pub const CHALLENGE: &str = "#challenge-form";
pub const COLLECTION: &str = "IndeedBot";

/// Page controller with a toggleable challenge screen
#[derive(Default)]
pub struct FakePage {
    challenge: AtomicBool,
    probes: AtomicUsize,
}

impl FakePage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_challenge(&self, showing: bool) {
        self.challenge.store(showing, Ordering::SeqCst);
    }

    pub fn challenge_showing(&self) -> bool {
        self.challenge.load(Ordering::SeqCst)
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageController for FakePage {
    async fn present(&self, selector: &str) -> Result<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        Ok(selector == CHALLENGE && self.challenge_showing())
    }

    async fn find(&self, _selector: &str, _timeout: Duration) -> Result<Option<Element>> {
        Ok(None)
    }

    async fn find_all(&self, _selector: &str, _timeout: Duration) -> Result<Vec<Element>> {
        Ok(Vec::new())
    }

    async fn click(&self, _target: &Element) -> Result<()> {
        Ok(())
    }

    async fn type_text(&self, _target: &Element, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn navigate(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        Ok("https://jobs.example/search".to_string())
    }
}

/// Source that serves the same fixed pages for every search
pub struct ScriptedSource {
    pages: Vec<Vec<Record>>,
    interrupt: Option<String>,
    fail_setup: bool,
    challenge_blocks_extract: bool,
    /// Remaining failures per id; `u32::MAX` fails forever
    extract_failures: Mutex<HashMap<String, u32>>,
    cancel_on: Option<(String, CancellationToken)>,
    current: Mutex<usize>,
    extracted: Mutex<Vec<String>>,
    setups: AtomicUsize,
    advances: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(pages: Vec<Vec<Record>>) -> Self {
        Self {
            pages,
            interrupt: None,
            fail_setup: false,
            challenge_blocks_extract: false,
            extract_failures: Mutex::new(HashMap::new()),
            cancel_on: None,
            current: Mutex::new(0),
            extracted: Mutex::new(Vec::new()),
            setups: AtomicUsize::new(0),
            advances: AtomicUsize::new(0),
        }
    }

    pub fn with_interrupt(mut self, selector: &str) -> Self {
        self.interrupt = Some(selector.to_string());
        self
    }

    pub fn failing_setup(mut self) -> Self {
        self.fail_setup = true;
        self
    }

    /// Extraction fails whenever the challenge screen is up
    pub fn blocked_by_challenge(mut self) -> Self {
        self.challenge_blocks_extract = true;
        self
    }

    pub fn fail_extract(self, id: &str, times: u32) -> Self {
        self.extract_failures.lock().insert(id.to_string(), times);
        self
    }

    /// Cancel `token` when `id` is extracted, then hang
    pub fn cancel_on(mut self, id: &str, token: CancellationToken) -> Self {
        self.cancel_on = Some((id.to_string(), token));
        self
    }

    pub fn extracted(&self) -> Vec<String> {
        self.extracted.lock().clone()
    }

    pub fn setups(&self) -> usize {
        self.setups.load(Ordering::SeqCst)
    }

    pub fn advances(&self) -> usize {
        self.advances.load(Ordering::SeqCst)
    }

    fn find_record(&self, id: &str) -> Option<Record> {
        self.pages.iter().flatten().find(|r| r.id == id).cloned()
    }
}

#[async_trait]
impl Source for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn interrupt_selector(&self) -> Option<&str> {
        self.interrupt.as_deref()
    }

    async fn setup(&self, _page: &dyn PageController) -> Result<LoginState> {
        self.setups.fetch_add(1, Ordering::SeqCst);
        if self.fail_setup {
            bail!("login rejected");
        }
        Ok(LoginState::LoggedIn)
    }

    async fn search(&self, _page: &dyn PageController, _request: &SearchRequest) -> Result<bool> {
        *self.current.lock() = 0;
        Ok(!self.pages.is_empty())
    }

    async fn list_records(&self, _page: &dyn PageController) -> Result<Vec<RecordHandle>> {
        let current = *self.current.lock();
        let page = self
            .pages
            .get(current)
            .ok_or_else(|| anyhow!("no page {}", current))?;
        Ok(page
            .iter()
            .enumerate()
            .map(|(i, r)| RecordHandle::new(r.id.clone(), Element::new("li.result", i)))
            .collect())
    }

    async fn extract_record(
        &self,
        page: &dyn PageController,
        handle: &RecordHandle,
    ) -> Result<Record> {
        if let Some((id, token)) = &self.cancel_on {
            if *id == handle.id {
                token.cancel();
                std::future::pending::<()>().await;
            }
        }

        if self.challenge_blocks_extract && page.present(CHALLENGE).await? {
            bail!("page covered by challenge");
        }

        {
            let mut failures = self.extract_failures.lock();
            if let Some(remaining) = failures.get_mut(&handle.id) {
                if *remaining > 0 {
                    if *remaining != u32::MAX {
                        *remaining -= 1;
                    }
                    bail!("detail pane for {} did not load", handle.id);
                }
            }
        }

        self.extracted.lock().push(handle.id.clone());
        self.find_record(&handle.id)
            .ok_or_else(|| anyhow!("unknown record {}", handle.id))
    }

    async fn has_next_page(&self, _page: &dyn PageController) -> Result<bool> {
        Ok(*self.current.lock() + 1 < self.pages.len())
    }

    async fn advance_page(&self, _page: &dyn PageController) -> Result<()> {
        *self.current.lock() += 1;
        self.advances.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Store that connects but rejects every batch
#[derive(Default)]
pub struct RejectingStore {
    pub batches: AtomicUsize,
}

#[async_trait]
impl DurableStore for RejectingStore {
    async fn connect(&self) -> Result<()> {
        Ok(())
    }

    async fn find_one(&self, _collection: &str, _id: &str) -> Result<Option<Value>> {
        Ok(None)
    }

    async fn bulk_upsert(
        &self,
        _collection: &str,
        _ops: Vec<UpsertOp>,
        _ordered: bool,
    ) -> Result<UpsertOutcome> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        bail!("server selection timeout")
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Store that cannot be reached at all
pub struct UnreachableStore;

#[async_trait]
impl DurableStore for UnreachableStore {
    async fn connect(&self) -> Result<()> {
        bail!("connection refused")
    }

    async fn find_one(&self, _collection: &str, _id: &str) -> Result<Option<Value>> {
        bail!("not connected")
    }

    async fn bulk_upsert(
        &self,
        _collection: &str,
        _ops: Vec<UpsertOp>,
        _ordered: bool,
    ) -> Result<UpsertOutcome> {
        bail!("not connected")
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

pub fn job(id: &str, title: &str) -> Record {
    Record::new(id)
        .with_title(title)
        .with_url(format!("https://jobs.example/view?jk={}", id))
        .with_location("Remote")
}

/// One search, no filters, no pacing
pub fn plan() -> SessionPlan {
    SessionPlan {
        collection: COLLECTION.to_string(),
        searches: vec![SearchRequest::new("python developer", Some("Remote".into()))],
        filters: Vec::new(),
        settings: SessionSettings::default().with_settle_delay(Duration::ZERO),
    }
}

pub fn plan_with_filters(filters: Vec<FilterRule>) -> SessionPlan {
    SessionPlan {
        filters,
        ..plan()
    }
}
