use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::record::LoginState;
use crate::store::{FlushOutcome, StoreTotals};

/// Counters for one session run
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session_id: String,
    pub source: String,
    /// `None` until the source's setup step has completed
    pub login_state: Option<LoginState>,
    pub searches: usize,
    pub pages: usize,
    pub records_seen: usize,
    /// Skipped because the id was already staged or stored
    pub known: usize,
    pub filtered_out: usize,
    pub staged: usize,
    pub recovered: usize,
    pub extraction_failures: usize,
    pub page_retries: usize,
    pub flushes: usize,
    pub fallback_flushes: usize,
    pub inserted: usize,
    pub updated: usize,
    pub fallback_written: usize,
    pub started_at: DateTime<Utc>,
    pub duration_seconds: f64,
}

impl SessionReport {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            source: source.into(),
            login_state: None,
            searches: 0,
            pages: 0,
            records_seen: 0,
            known: 0,
            filtered_out: 0,
            staged: 0,
            recovered: 0,
            extraction_failures: 0,
            page_retries: 0,
            flushes: 0,
            fallback_flushes: 0,
            inserted: 0,
            updated: 0,
            fallback_written: 0,
            started_at: Utc::now(),
            duration_seconds: 0.0,
        }
    }

    pub(crate) fn record_flush(&mut self, outcome: &FlushOutcome) {
        match outcome {
            FlushOutcome::Empty => {}
            FlushOutcome::Persisted { .. } => self.flushes += 1,
            FlushOutcome::FellBack { .. } => {
                self.flushes += 1;
                self.fallback_flushes += 1;
            }
        }
    }

    pub(crate) fn finish(&mut self, totals: StoreTotals) {
        self.inserted = totals.inserted;
        self.updated = totals.updated;
        self.fallback_written = totals.fallback_written;
        self.duration_seconds = (Utc::now() - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
    }
}
