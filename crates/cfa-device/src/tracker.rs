//! The device tracker: registry of managed devices over one bridge.
//!
//! All registry mutation goes through a single async mutex. Device-level
//! teardown runs outside that lock, so stopping one device never waits on
//! another. Registrations are serialized end to end by a second lock, held
//! from removing a replaced entry until its successor is inserted.

use cfa_config::AgentConfig;
use cfa_core::{AgentError, BridgeKind, DeviceId, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::bridge::{Bridge, Transport};
use crate::device::{Device, SessionSlot};
use crate::driver::{DriverClient, WdaClient};
use crate::process::ProcessSupervisor;
use crate::wda::{RunningWda, StartOutcome, WdaController};

/// Builds the driver client for a forwarded local port.
pub type DriverFactory = Arc<dyn Fn(u16) -> Arc<dyn DriverClient> + Send + Sync>;

/// How [`DeviceTracker::start_wda`] treats the start outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    /// Return once the driver is running, or with the start failure.
    Wait,
    /// Return immediately; the outcome is logged and the session kept.
    Detached,
}

/// Point-in-time view of a managed device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceSnapshot {
    /// Censored identifier.
    pub udid: String,
    pub wda_port: u16,
    pub video_port: u16,
    pub bridge: BridgeKind,
    pub wda_state: String,
}

#[derive(Default)]
struct TrackerState {
    devices: HashMap<DeviceId, Device>,
    shut_down: bool,
}

pub struct DeviceTracker {
    config: Arc<AgentConfig>,
    bridge: Arc<dyn Bridge>,
    supervisor: Arc<ProcessSupervisor>,
    driver_factory: DriverFactory,
    state: Mutex<TrackerState>,
    registering: Mutex<()>,
    shutdown_once: AtomicBool,
}

impl DeviceTracker {
    pub fn new(config: Arc<AgentConfig>, bridge: Arc<dyn Bridge>, supervisor: Arc<ProcessSupervisor>) -> Self {
        let host = config.wda.host.clone();
        let driver_factory: DriverFactory =
            Arc::new(move |port| Arc::new(WdaClient::new(&host, port)) as Arc<dyn DriverClient>);
        Self {
            config,
            bridge,
            supervisor,
            driver_factory,
            state: Mutex::new(TrackerState::default()),
            registering: Mutex::new(()),
            shutdown_once: AtomicBool::new(false),
        }
    }

    /// Replace how driver clients are built.
    pub fn with_driver_factory(mut self, factory: DriverFactory) -> Self {
        self.driver_factory = factory;
        self
    }

    pub fn bridge(&self) -> &Arc<dyn Bridge> {
        &self.bridge
    }

    pub fn supervisor(&self) -> &Arc<ProcessSupervisor> {
        &self.supervisor
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown_once.load(Ordering::SeqCst)
    }

    fn closed(id: &DeviceId) -> AgentError {
        AgentError::InvalidState {
            udid: id.clone(),
            reason: "tracker is shut down".into(),
        }
    }

    // ─── Discovery & registration ───────────────────────────────

    /// Pick a device: `filter` if it is attached, otherwise the first one found.
    pub async fn discover(&self, filter: Option<&DeviceId>) -> Result<DeviceId> {
        let ids = self.bridge.discover().await?;
        match filter {
            Some(wanted) => ids
                .into_iter()
                .find(|id| id == wanted)
                .ok_or_else(|| AgentError::DeviceNotFound(wanted.clone())),
            None => ids.into_iter().next().ok_or(AgentError::NoDevices),
        }
    }

    /// Build and register a device. An existing entry is released first.
    ///
    /// Returns the local WDA port assigned to the device.
    pub async fn register(&self, id: &DeviceId) -> Result<u16> {
        let _registering = self.registering.lock().await;
        let previous = {
            let mut state = self.state.lock().await;
            if state.shut_down {
                return Err(Self::closed(id));
            }
            state.devices.remove(id)
        };
        if let Some(mut previous) = previous {
            debug!(udid = %id, "replacing registered device");
            previous.shutdown().await;
        }

        let mut state = self.state.lock().await;
        if state.shut_down {
            return Err(Self::closed(id));
        }

        let offset = lowest_free_offset(&state.devices, self.config.wda.base_port);
        let wda_port = port_at(self.config.wda.base_port, offset)?;
        let video_port = port_at(self.config.video.base_port, offset)?;

        let mut transport = self.bridge.create_transport(id);
        transport.attach_supervisor(Arc::clone(&self.supervisor));
        let transport: Arc<dyn Transport> = Arc::from(transport);
        let driver = (self.driver_factory)(wda_port);

        let device = Device::new(
            id.clone(),
            Arc::clone(&self.config),
            transport,
            driver,
            wda_port,
            video_port,
        );
        let displaced = state.devices.insert(id.clone(), device);
        drop(state);
        if let Some(mut displaced) = displaced {
            warn!(udid = %id, "registered device displaced, shutting it down");
            displaced.shutdown().await;
        }
        info!(udid = %id, wda_port, bridge = %self.bridge.kind(), "device registered");
        Ok(wda_port)
    }

    /// Stop and forget a device.
    pub async fn release(&self, id: &DeviceId) -> Result<()> {
        let device = self.state.lock().await.devices.remove(id);
        let mut device = device.ok_or_else(|| AgentError::DeviceNotFound(id.clone()))?;
        device.shutdown().await;
        info!(udid = %id, "device released");
        Ok(())
    }

    // ─── WDA ────────────────────────────────────────────────────

    pub async fn wda(&self, id: &DeviceId) -> Option<WdaController> {
        self.state.lock().await.devices.get(id).map(|d| d.wda().clone())
    }

    /// Start the driver on a registered device. The running session is kept
    /// by the device until [`stop_wda`](Self::stop_wda) or shutdown.
    pub async fn start_wda(&self, id: &DeviceId, mode: StartMode) -> Result<()> {
        let (wda, slot) = {
            let state = self.state.lock().await;
            if state.shut_down {
                return Err(Self::closed(id));
            }
            let device = state
                .devices
                .get(id)
                .ok_or_else(|| AgentError::DeviceNotFound(id.clone()))?;
            (device.wda().clone(), Arc::clone(&device.session))
        };

        let pending = wda.start()?;
        match mode {
            StartMode::Wait => {
                let running = pending.wait().await.into_result(id)?;
                hold_session(&slot, running).await;
                Ok(())
            }
            StartMode::Detached => {
                let udid = id.clone();
                tokio::spawn(async move {
                    match pending.wait().await {
                        StartOutcome::Running(running) => hold_session(&slot, running).await,
                        StartOutcome::Failed { code, reason } => {
                            warn!(udid = %udid, code, reason = %reason, "detached wda start failed");
                        }
                    }
                });
                Ok(())
            }
        }
    }

    /// Stop the device's running session. Returns `false` if none was held.
    pub async fn stop_wda(&self, id: &DeviceId) -> Result<bool> {
        let (wda, slot) = {
            let state = self.state.lock().await;
            let device = state
                .devices
                .get(id)
                .ok_or_else(|| AgentError::DeviceNotFound(id.clone()))?;
            (device.wda().clone(), Arc::clone(&device.session))
        };

        let held = {
            let mut slot = slot.lock().await;
            match std::mem::take(&mut *slot) {
                SessionSlot::Held(running) => Some(running),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        match held {
            Some(running) => {
                running.stop().await;
                wda.wait_idle().await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn start_backup_video(&self, id: &DeviceId) -> Result<u16> {
        let mut state = self.state.lock().await;
        let device = state
            .devices
            .get_mut(id)
            .ok_or_else(|| AgentError::DeviceNotFound(id.clone()))?;
        device.start_backup_video().await
    }

    // ─── Introspection ──────────────────────────────────────────

    pub async fn device_ids(&self) -> Vec<DeviceId> {
        let mut ids: Vec<DeviceId> = self.state.lock().await.devices.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.devices.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn snapshot(&self) -> Vec<DeviceSnapshot> {
        let state = self.state.lock().await;
        let mut snapshot: Vec<DeviceSnapshot> = state
            .devices
            .values()
            .map(|d| DeviceSnapshot {
                udid: d.id().censored(),
                wda_port: d.wda_port(),
                video_port: d.video_port(),
                bridge: self.bridge.kind(),
                wda_state: d.wda().state().to_string(),
            })
            .collect();
        snapshot.sort_by_key(|s| s.wda_port);
        snapshot
    }

    // ─── Shutdown ───────────────────────────────────────────────

    /// Stop every device, then shut the bridge down. Runs at most once;
    /// later calls return immediately.
    pub async fn shutdown(&self) {
        if self.shutdown_once.swap(true, Ordering::SeqCst) {
            debug!("tracker shutdown already done");
            return;
        }

        let mut devices: Vec<Device> = {
            let mut state = self.state.lock().await;
            state.shut_down = true;
            state.devices.drain().map(|(_, d)| d).collect()
        };
        info!(devices = devices.len(), "shutting down tracker");

        futures::future::join_all(devices.iter_mut().map(Device::shutdown)).await;
        self.bridge.shutdown().await;
        info!("tracker shut down");
    }
}

/// Put a running session into the device's slot, or stop it if the device
/// is already closing.
async fn hold_session(slot: &Mutex<SessionSlot>, running: RunningWda) {
    let mut guard = slot.lock().await;
    match std::mem::take(&mut *guard) {
        SessionSlot::Closed => {
            *guard = SessionSlot::Closed;
            drop(guard);
            debug!(udid = %running.udid(), "device closing, stopping late session");
            running.stop().await;
        }
        SessionSlot::Held(stale) => {
            *guard = SessionSlot::Held(running);
            drop(guard);
            stale.stop().await;
        }
        SessionSlot::Empty => *guard = SessionSlot::Held(running),
    }
}

fn lowest_free_offset(devices: &HashMap<DeviceId, Device>, base: u16) -> u16 {
    let used: Vec<u16> = devices
        .values()
        .map(|d| d.wda_port().saturating_sub(base))
        .collect();
    (0..=u16::MAX).find(|o| !used.contains(o)).unwrap_or(u16::MAX)
}

fn port_at(base: u16, offset: u16) -> Result<u16> {
    base.checked_add(offset)
        .ok_or_else(|| AgentError::ConfigInvalid(format!("no free port above {base}")))
}

impl std::fmt::Debug for DeviceTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceTracker")
            .field("bridge", &self.bridge.kind())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
