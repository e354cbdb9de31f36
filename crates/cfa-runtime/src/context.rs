use cfa_config::AgentConfig;
use cfa_device::{DeviceTracker, ProcessSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::shutdown::ShutdownCoordinator;

/// Everything one invocation shares between its tasks.
#[derive(Clone)]
pub struct AgentContext {
    pub config: Arc<AgentConfig>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub tracker: Arc<DeviceTracker>,
    pub shutdown: Arc<ShutdownCoordinator>,
}

impl AgentContext {
    /// Context over the real OS process table and the configured bridge.
    pub fn new(config: Arc<AgentConfig>) -> Self {
        let supervisor = ProcessSupervisor::system(config.process.marker.clone());
        let bridge = cfa_device::bridge::from_config(&config);
        let tracker = DeviceTracker::new(Arc::clone(&config), bridge, supervisor);
        Self::with_tracker(config, tracker)
    }

    /// Context around an already-built tracker.
    pub fn with_tracker(config: Arc<AgentConfig>, tracker: DeviceTracker) -> Self {
        let supervisor = Arc::clone(tracker.supervisor());
        let tracker = Arc::new(tracker);
        let shutdown = Arc::new(ShutdownCoordinator::new(Arc::clone(&tracker)));
        Self {
            config,
            supervisor,
            tracker,
            shutdown,
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.shutdown.token()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.config.process.heartbeat_interval_ms)
    }
}
