//! Retry Policy - Bounded exponential backoff for flaky extraction steps
//!
//! Attempt `n` that fails waits `base_delay_secs ^ n` seconds before the next
//! one (5s, 25s, ... with the default base of 5). Every retry first passes
//! through the interrupt gate, and a failure observed while the interrupt is
//! showing is not charged against the attempt budget.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RetryError;
use crate::gate::InterruptGate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    /// Base of the exponential backoff, in seconds
    pub base_delay_secs: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_secs: 5,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_secs: u64) -> Self {
        Self {
            max_attempts,
            base_delay_secs,
        }
    }

    /// Backoff after the failed attempt number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.base_delay_secs.saturating_pow(attempt))
    }

    /// Run `op` until it succeeds or the attempt budget is spent.
    ///
    /// `operation` names the step in logs and in the terminal error.
    pub async fn execute<T, F, Fut>(
        &self,
        operation: &str,
        gate: &InterruptGate,
        mut op: F,
    ) -> Result<T, RetryError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            let error = match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("{} succeeded on attempt {}", operation, attempt);
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if gate.is_active() {
                debug!(
                    "{} failed while an interrupt was showing, not counting attempt {}: {:#}",
                    operation, attempt, error
                );
                self.wait_clear(operation, gate).await?;
                continue;
            }

            if attempt >= max_attempts {
                return Err(RetryError::Exhausted {
                    operation: operation.to_string(),
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = self.delay_for(attempt);
            warn!(
                "{} failed (attempt {}/{}, {} remaining), retrying in {}: {:#}",
                operation,
                attempt,
                max_attempts,
                max_attempts - attempt,
                humantime::format_duration(delay),
                error
            );
            tokio::time::sleep(delay).await;
            self.wait_clear(operation, gate).await?;
            attempt += 1;
        }
    }

    async fn wait_clear(&self, operation: &str, gate: &InterruptGate) -> Result<(), RetryError> {
        gate.await_clear()
            .await
            .map_err(|source| RetryError::Interrupted {
                operation: operation.to_string(),
                source,
            })
    }
}
