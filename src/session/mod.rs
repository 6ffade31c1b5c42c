//! Session module - Drives one extraction session against one source
//!
//! - `PageController`: the browser capability (external)
//! - `Source`: per-site search/list/extract/paginate capability (injected)
//! - `SessionOrchestrator`: composes gate, retry, filters and store
//! - `SessionReport`: counters for a finished run

mod orchestrator;
mod page;
mod report;
mod source;

pub use orchestrator::{SessionOrchestrator, SessionPlan, SessionSettings};
pub use page::{Element, PageController};
pub use report::SessionReport;
pub use source::Source;
