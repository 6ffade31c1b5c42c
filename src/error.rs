//! Error taxonomy
//!
//! Recoverable failures are handled where they occur (retries, file
//! fallback); what reaches the caller of a session is a `SessionError`.

use std::time::Duration;

use thiserror::Error;

/// Failures waiting on the interrupt gate
#[derive(Debug, Error)]
pub enum GateError {
    #[error("interrupt gate closed")]
    Closed,

    #[error("interrupt did not clear within {}", humantime::format_duration(*.0))]
    Timeout(Duration),
}

/// Terminal outcome of a retried operation
#[derive(Debug, Error)]
pub enum RetryError {
    #[error("{operation} failed after {attempts} attempts: {source:#}")]
    Exhausted {
        operation: String,
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("{operation} interrupted while waiting to retry: {source}")]
    Interrupted {
        operation: String,
        #[source]
        source: GateError,
    },
}

#[derive(Debug, Error)]
pub enum FilterError {
    #[error("invalid keyword {keyword:?} in filter rule {rule}: {source}")]
    InvalidKeyword {
        rule: usize,
        keyword: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to the durable store: {0:#}")]
    Connect(#[source] anyhow::Error),

    #[error("lookup of {id} in {collection} failed: {source:#}")]
    Lookup {
        collection: String,
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("fallback write for record {id} failed: {source:#}")]
    Fallback {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to recover fallback records for {namespace}: {source:#}")]
    Recovery {
        namespace: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to serialize record {id}: {source}")]
    Serialize {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A failure that ends the session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("authentication failed: {0:#}")]
    Authentication(#[source] anyhow::Error),

    #[error("interrupt never cleared: {0}")]
    InterruptTimeout(#[source] GateError),

    #[error("session torn down while waiting on the interrupt gate")]
    GateClosed,

    #[error("page {page} of {search:?} failed on all {attempts} attempts: {source}")]
    PageRetriesExhausted {
        search: String,
        page: u32,
        attempts: u32,
        #[source]
        source: RetryError,
    },

    #[error("source step {step} failed: {source:#}")]
    Source {
        step: &'static str,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error("session cancelled")]
    Cancelled,
}

impl SessionError {
    pub(crate) fn source_step(step: &'static str, source: anyhow::Error) -> Self {
        SessionError::Source { step, source }
    }
}

impl From<GateError> for SessionError {
    fn from(err: GateError) -> Self {
        match err {
            GateError::Closed => SessionError::GateClosed,
            timeout @ GateError::Timeout(_) => SessionError::InterruptTimeout(timeout),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exhausted_message_names_operation_and_attempts() {
        let err = RetryError::Exhausted {
            operation: "extract 42".to_string(),
            attempts: 3,
            source: anyhow::anyhow!("element not found"),
        };
        let msg = err.to_string();
        assert!(msg.contains("extract 42"));
        assert!(msg.contains("3 attempts"));
        assert!(msg.contains("element not found"));
    }

    #[test]
    fn test_gate_error_maps_to_session_error() {
        assert!(matches!(
            SessionError::from(GateError::Closed),
            SessionError::GateClosed
        ));
        assert!(matches!(
            SessionError::from(GateError::Timeout(Duration::from_secs(1))),
            SessionError::InterruptTimeout(_)
        ));
    }
}
