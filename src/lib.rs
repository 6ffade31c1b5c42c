//! Jobot Library
//!
//! Orchestration core for job-listing extraction sessions: walks a site's
//! search results page by page, pauses while a challenge screen is up,
//! filters records with keyword rules, and persists each accepted record
//! exactly once with a file fallback when the store is unavailable.
//!
//! # Features
//!
//! - **Interrupt Gate**: every page step waits while a challenge is detected
//! - **Bounded Retry**: exponential backoff that never spends attempts on a blocked page
//! - **Keyword Filters**: accent/case-insensitive whole-word include/exclude rules
//! - **Exactly-once Persistence**: deduplicated, batched upserts with JSON file fallback
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use jobot::{Config, JsonFileSink, MemoryStore, PageController, SessionOrchestrator, Source};
//! use tokio_util::sync::CancellationToken;
//!
//! async fn run(
//!     source: Arc<dyn Source>,
//!     page: Arc<dyn PageController>,
//! ) -> anyhow::Result<()> {
//!     let config = Config::load();
//!     let plan = config.session_plan("indeed")?;
//!
//!     let orchestrator = SessionOrchestrator::new(
//!         plan,
//!         source,
//!         page,
//!         Arc::new(MemoryStore::new()),
//!         Arc::new(config.fallback_sink()),
//!     )?;
//!     let report = orchestrator.run(CancellationToken::new()).await?;
//!
//!     println!("{} records staged", report.staged);
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod error;
pub mod filter;
pub mod gate;
pub mod record;
pub mod retry;
pub mod session;
pub mod store;

// Re-export commonly used types
pub use config::{generate_sample_config, Config};
pub use error::{FilterError, GateError, RetryError, SessionError, StoreError};
pub use filter::{FilterEngine, FilterRule, MatchMode};
pub use gate::{GateState, InterruptGate, InterruptMonitor};
pub use record::{LoginState, Record, RecordField, RecordHandle, SearchRequest};
pub use retry::RetryPolicy;
pub use session::{
    Element, PageController, SessionOrchestrator, SessionPlan, SessionReport, SessionSettings,
    Source,
};
pub use store::{
    DurableStore, FallbackSink, FlushOutcome, JsonFileSink, MemoryStore, RecordStore, StoreTotals,
    UpsertOp, UpsertOutcome,
};
