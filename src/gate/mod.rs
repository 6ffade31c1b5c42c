//! Interrupt Gate - Suspend/resume coordination for extraction steps
//!
//! One writer (the `InterruptMonitor`) flips the gate between `Clear` and
//! `Active`; every extraction step calls `await_clear()` before touching the
//! page. State lives in a `tokio::sync::watch` channel, so every transition
//! is broadcast and waiters re-check the state on each wake:
//! - `Clear`: extraction may proceed
//! - `Active`: an interrupt (e.g. a challenge screen) is showing
//! - `Closed`: the session is gone, waiters are released with an error

mod monitor;

pub use monitor::{InterruptMonitor, MonitorHandle};

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::error::GateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum GateState {
    Clear,
    Active,
    Closed,
}

impl fmt::Display for GateState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateState::Clear => write!(f, "clear"),
            GateState::Active => write!(f, "active"),
            GateState::Closed => write!(f, "closed"),
        }
    }
}

/// Shared suspend/resume gate. Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct InterruptGate {
    state: Arc<watch::Sender<GateState>>,
    max_wait: Option<Duration>,
}

impl InterruptGate {
    /// Create a gate in the `Clear` state that waits forever for clearance
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(GateState::Clear);
        Self {
            state: Arc::new(tx),
            max_wait: None,
        }
    }

    /// Bound how long a single `await_clear` may stay suspended
    pub fn with_max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn state(&self) -> GateState {
        *self.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() == GateState::Active
    }

    /// Mark the interrupt as present. Returns true if the state changed.
    pub fn activate(&self) -> bool {
        let changed = self.transition(GateState::Active);
        if changed {
            info!("Interrupt detected, suspending extraction");
        }
        changed
    }

    /// Mark the interrupt as gone. Returns true if the state changed.
    pub fn clear(&self) -> bool {
        let changed = self.transition(GateState::Clear);
        if changed {
            info!("Interrupt cleared, resuming extraction");
        }
        changed
    }

    /// Tear the gate down, releasing every waiter with `GateError::Closed`.
    pub fn close(&self) {
        if self.transition(GateState::Closed) {
            debug!("Interrupt gate closed");
        }
    }

    // Closed is terminal; only real changes are broadcast.
    fn transition(&self, next: GateState) -> bool {
        self.state.send_if_modified(|current| {
            if *current == GateState::Closed || *current == next {
                return false;
            }
            *current = next;
            true
        })
    }

    /// Suspend until the gate is clear at the time of returning.
    ///
    /// Returns immediately when already clear. Multiple waiters resume
    /// together; there is no fairness ordering.
    pub async fn await_clear(&self) -> Result<(), GateError> {
        let mut rx = self.state.subscribe();
        let state = match self.max_wait {
            Some(limit) => {
                let waited = tokio::time::timeout(limit, wait_not_active(&mut rx)).await;
                waited.map_err(|_| GateError::Timeout(limit))??
            }
            None => wait_not_active(&mut rx).await?,
        };

        match state {
            GateState::Closed => Err(GateError::Closed),
            _ => Ok(()),
        }
    }
}

async fn wait_not_active(rx: &mut watch::Receiver<GateState>) -> Result<GateState, GateError> {
    let state = rx
        .wait_for(|state| *state != GateState::Active)
        .await
        .map_err(|_| GateError::Closed)?;
    Ok(*state)
}

impl Default for InterruptGate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for InterruptGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterruptGate")
            .field("state", &self.state())
            .field("max_wait", &self.max_wait)
            .finish()
    }
}
