//! Signal-driven shutdown and the heartbeat loop.

use cfa_device::DeviceTracker;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Runs the tracker shutdown at most once, however many times it is
/// triggered, then cancels the shared token.
pub struct ShutdownCoordinator {
    tracker: Arc<DeviceTracker>,
    token: CancellationToken,
    triggered: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(tracker: Arc<DeviceTracker>) -> Self {
        Self {
            tracker,
            token: CancellationToken::new(),
            triggered: AtomicBool::new(false),
        }
    }

    /// Token cancelled once shutdown has completed.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Stop every device, then cancel the token. Later calls are no-ops.
    pub async fn trigger(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("shutdown already triggered");
            return;
        }
        info!("shutting down");
        self.tracker.shutdown().await;
        self.token.cancel();
    }

    /// Wait for SIGINT or SIGTERM and trigger shutdown. Returns early if the
    /// token is cancelled by other means.
    pub async fn listen(&self) {
        tokio::select! {
            _ = self.token.cancelled() => {
                debug!("signal listener stopped");
            }
            name = wait_for_signal() => {
                info!(signal = name, "received signal");
                self.trigger().await;
            }
        }
    }

    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.listen().await })
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let (mut sigterm, mut sigint) = match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(term), Ok(int)) => (term, int),
        (Err(e), _) | (_, Err(e)) => {
            warn!(error = %e, "failed to install signal handlers, falling back to ctrl-c");
            return ctrl_c().await;
        }
    };

    tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match tokio::signal::ctrl_c().await {
        Ok(()) => "ctrl-c",
        Err(e) => {
            warn!(error = %e, "ctrl-c handler unavailable");
            std::future::pending().await
        }
    }
}

/// Tick every `interval` until `token` is cancelled. Returns the number of ticks.
pub async fn run_heartbeat(
    token: CancellationToken,
    interval: Duration,
    mut on_tick: impl FnMut(u64),
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut ticks = 0;
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = ticker.tick() => {
                ticks += 1;
                on_tick(ticks);
            }
        }
    }
    debug!(ticks, "heartbeat stopped");
    ticks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_heartbeat_stops_on_cancel() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(60)).await;
            canceller.cancel();
        });

        let mut seen = vec![];
        let ticks = run_heartbeat(token, Duration::from_millis(10), |n| seen.push(n)).await;
        assert!(ticks >= 1);
        assert_eq!(seen.len() as u64, ticks);
        assert_eq!(seen.first(), Some(&1));
    }

    #[tokio::test]
    async fn test_heartbeat_precancelled() {
        let token = CancellationToken::new();
        token.cancel();
        let ticks = run_heartbeat(token, Duration::from_secs(1), |_| {}).await;
        assert_eq!(ticks, 0);
    }
}
