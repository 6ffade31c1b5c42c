//! Background task that polls the page for the interrupt indicator and
//! drives the gate.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::InterruptGate;
use crate::session::PageController;

/// Polls `selector` on a fixed cadence and mirrors its presence into the gate
pub struct InterruptMonitor {
    gate: InterruptGate,
    page: Arc<dyn PageController>,
    selector: String,
    interval: Duration,
}

impl InterruptMonitor {
    pub fn new(
        gate: InterruptGate,
        page: Arc<dyn PageController>,
        selector: impl Into<String>,
        interval: Duration,
    ) -> Self {
        Self {
            gate,
            page,
            selector: selector.into(),
            interval,
        }
    }

    /// Start polling. The returned handle must be shut down (and awaited)
    /// before the page controller is released.
    pub fn spawn(self, cancel: CancellationToken) -> MonitorHandle {
        let token = cancel.clone();
        let task = tokio::spawn(async move { self.run(token).await });
        MonitorHandle { cancel, task }
    }

    async fn run(self, cancel: CancellationToken) {
        debug!(
            "Interrupt monitor polling {:?} every {}",
            self.selector,
            humantime::format_duration(self.interval)
        );

        loop {
            let present = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                present = self.page.present(&self.selector) => present,
            };

            match present {
                Ok(true) => {
                    self.gate.activate();
                }
                Ok(false) => {
                    self.gate.clear();
                }
                // A failed probe says nothing about the interrupt; keep the last state.
                Err(e) => warn!("Interrupt probe failed: {:#}", e),
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        debug!("Interrupt monitor stopped");
    }
}

/// Owner of a running monitor task
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Cancel the monitor and wait until it has stopped touching the page.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            if e.is_panic() {
                warn!("Interrupt monitor panicked: {}", e);
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateState;
    use crate::session::Element;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct ChallengePage {
        challenge: AtomicBool,
        probes: AtomicUsize,
    }

    #[async_trait]
    impl PageController for ChallengePage {
        async fn present(&self, _selector: &str) -> Result<bool> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            Ok(self.challenge.load(Ordering::SeqCst))
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
            Ok("about:blank".to_string())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_mirrors_indicator_into_gate() {
        let page = Arc::new(ChallengePage::default());
        let gate = InterruptGate::new();
        let handle = InterruptMonitor::new(
            gate.clone(),
            page.clone(),
            "#challenge",
            Duration::from_millis(100),
        )
        .spawn(CancellationToken::new());

        page.challenge.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(gate.state(), GateState::Active);

        page.challenge.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(gate.state(), GateState::Clear);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_polling() {
        let page = Arc::new(ChallengePage::default());
        let gate = InterruptGate::new();
        let handle = InterruptMonitor::new(
            gate,
            page.clone(),
            "#challenge",
            Duration::from_millis(50),
        )
        .spawn(CancellationToken::new());

        tokio::time::sleep(Duration::from_millis(120)).await;
        handle.shutdown().await;

        let probes = page.probes.load(Ordering::SeqCst);
        assert!(probes > 0);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(page.probes.load(Ordering::SeqCst), probes);
    }
}
