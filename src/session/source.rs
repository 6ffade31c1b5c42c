//! Per-site capability injected into the orchestrator.
//!
//! A source knows its selectors and page-traversal sequence; the
//! orchestrator knows everything else (gating, retries, filtering,
//! persistence).

use anyhow::Result;
use async_trait::async_trait;

use super::PageController;
use crate::record::{LoginState, Record, RecordHandle, SearchRequest};

#[async_trait]
pub trait Source: Send + Sync {
    /// Site name used in logs and reports
    fn name(&self) -> &str;

    /// Selector whose presence means extraction must pause
    fn interrupt_selector(&self) -> Option<&str> {
        None
    }

    /// Open the site and authenticate if credentials are configured.
    /// An error here is an authentication failure.
    async fn setup(&self, page: &dyn PageController) -> Result<LoginState>;

    /// Run a search. Returns false when the search has no results.
    async fn search(&self, page: &dyn PageController, request: &SearchRequest) -> Result<bool>;

    /// Handles for the results on the current page, in listing order
    async fn list_records(&self, page: &dyn PageController) -> Result<Vec<RecordHandle>>;

    async fn extract_record(
        &self,
        page: &dyn PageController,
        handle: &RecordHandle,
    ) -> Result<Record>;

    async fn has_next_page(&self, page: &dyn PageController) -> Result<bool>;

    async fn advance_page(&self, page: &dyn PageController) -> Result<()>;
}
