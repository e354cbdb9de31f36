//! Deterministic stand-ins for the OS, the bridge tools and the driver.
//!
//! Nothing here spawns a real process or opens a socket. Helpers "spawned"
//! by [`MockTransport`] are rows in a [`MockProcessTable`] carrying the
//! supervisor's marker, so cleanup and release can be asserted on exactly.

use async_trait::async_trait;
use cfa_core::{AgentError, BridgeKind, DeviceId, Result};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};

use crate::bridge::{Bridge, HelperKind, PortForward, Transport, normalize};
use crate::driver::{AlertInfo, DriverClient, ElementHandle, WindowSize};
use crate::process::{ProcessHandle, ProcessInfo, ProcessSupervisor, ProcessTable};

// ─── Process table ──────────────────────────────────────────────

/// In-memory process table.
pub struct MockProcessTable {
    processes: Mutex<BTreeMap<u32, ProcessInfo>>,
    unkillable: Mutex<HashSet<u32>>,
    next_pid: AtomicU32,
}

impl MockProcessTable {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            processes: Mutex::new(BTreeMap::new()),
            unkillable: Mutex::new(HashSet::new()),
            next_pid: AtomicU32::new(100_000),
        })
    }

    fn insert(&self, name: &str, marker: Option<&str>) -> u32 {
        let pid = self.next_pid.fetch_add(1, Ordering::SeqCst);
        self.processes.lock().insert(
            pid,
            ProcessInfo {
                pid,
                name: name.to_string(),
                marker: marker.map(str::to_string),
            },
        );
        pid
    }

    /// Add a process carrying `marker`.
    pub fn spawn_marked(&self, marker: &str, name: &str) -> u32 {
        self.insert(name, Some(marker))
    }

    /// Add a process that does not belong to the agent.
    pub fn spawn_foreign(&self, name: &str) -> u32 {
        self.insert(name, None)
    }

    /// Make `kill(pid)` fail.
    pub fn fail_kill_for(&self, pid: u32) {
        self.unkillable.lock().insert(pid);
    }

    pub fn is_alive(&self, pid: u32) -> bool {
        self.processes.lock().contains_key(&pid)
    }

    pub fn count_marked(&self, marker: &str) -> usize {
        self.processes
            .lock()
            .values()
            .filter(|p| p.marker.as_deref() == Some(marker))
            .count()
    }

    /// Names of live processes carrying `marker`, in spawn order.
    pub fn marked_names(&self, marker: &str) -> Vec<String> {
        self.processes
            .lock()
            .values()
            .filter(|p| p.marker.as_deref() == Some(marker))
            .map(|p| p.name.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.processes.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ProcessTable for MockProcessTable {
    fn list(&self) -> Vec<ProcessInfo> {
        self.processes.lock().values().cloned().collect()
    }

    fn kill(&self, pid: u32) -> bool {
        if self.unkillable.lock().contains(&pid) {
            return false;
        }
        self.processes.lock().remove(&pid);
        true
    }
}

// ─── Bridge ─────────────────────────────────────────────────────

/// Per-device failure injection.
#[derive(Debug, Default, Clone, Copy)]
struct Faults {
    forward: bool,
    driver: bool,
}

/// A bridge over a fixed device list.
pub struct MockBridge {
    kind: BridgeKind,
    table: Arc<MockProcessTable>,
    devices: Mutex<Vec<DeviceId>>,
    faults: Mutex<HashMap<DeviceId, Faults>>,
    shutdowns: AtomicUsize,
    closed: AtomicBool,
    /// Ordered record of bridge-level calls.
    pub events: Arc<Mutex<Vec<String>>>,
}

impl MockBridge {
    pub fn new(table: Arc<MockProcessTable>) -> Self {
        Self {
            kind: BridgeKind::IosIf,
            table,
            devices: Mutex::new(vec![]),
            faults: Mutex::new(HashMap::new()),
            shutdowns: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            events: Arc::new(Mutex::new(vec![])),
        }
    }

    pub fn with_kind(mut self, kind: BridgeKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_devices(self, ids: &[&str]) -> Self {
        self.devices.lock().extend(ids.iter().map(|id| DeviceId::new(*id)));
        self
    }

    /// Port forwards for `id` fail.
    pub fn with_failing_forward(self, id: &str) -> Self {
        self.faults.lock().entry(DeviceId::new(id)).or_default().forward = true;
        self
    }

    /// Driver helpers for `id` fail to launch.
    pub fn with_failing_driver(self, id: &str) -> Self {
        self.faults.lock().entry(DeviceId::new(id)).or_default().driver = true;
        self
    }

    pub fn shutdown_count(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl Bridge for MockBridge {
    fn kind(&self) -> BridgeKind {
        self.kind
    }

    async fn discover(&self) -> Result<Vec<DeviceId>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::transport(self.kind, "bridge is shut down"));
        }
        Ok(normalize(self.devices.lock().clone()))
    }

    fn create_transport(&self, id: &DeviceId) -> Box<dyn Transport> {
        let faults = self.faults.lock().get(id).copied().unwrap_or_default();
        Box::new(MockTransport {
            udid: id.clone(),
            kind: self.kind,
            table: Arc::clone(&self.table),
            supervisor: None,
            faults,
            events: Arc::clone(&self.events),
        })
    }

    async fn shutdown(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        self.events.lock().push("bridge shutdown".into());
    }
}

// ─── Transport ──────────────────────────────────────────────────

pub struct MockTransport {
    udid: DeviceId,
    kind: BridgeKind,
    table: Arc<MockProcessTable>,
    supervisor: Option<Arc<ProcessSupervisor>>,
    faults: Faults,
    events: Arc<Mutex<Vec<String>>>,
}

impl MockTransport {
    fn spawn(&self, label: &str) -> Result<ProcessHandle> {
        let supervisor = self
            .supervisor
            .as_ref()
            .ok_or_else(|| AgentError::transport(self.kind, "no process supervisor attached"))?;
        let pid = self.table.spawn_marked(supervisor.marker(), label);
        Ok(supervisor.adopt(pid, label, Some(&self.udid)))
    }

    fn record(&self, event: String) {
        self.events.lock().push(event);
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn udid(&self) -> &DeviceId {
        &self.udid
    }

    fn kind(&self) -> BridgeKind {
        self.kind
    }

    fn attach_supervisor(&mut self, supervisor: Arc<ProcessSupervisor>) {
        self.supervisor = Some(supervisor);
    }

    async fn forward_port(&self, local: u16, remote: u16) -> Result<PortForward> {
        if self.faults.forward {
            return Err(AgentError::transport(self.kind, format!("forward {local} refused")));
        }
        let process = self.spawn("forward")?;
        self.record(format!("forward {} {local}:{remote}", self.udid.as_str()));
        Ok(PortForward::new(local, remote, process))
    }

    async fn spawn_helper(&self, helper: HelperKind) -> Result<ProcessHandle> {
        if self.faults.driver && helper == HelperKind::Driver {
            return Err(AgentError::transport(self.kind, "driver launch refused"));
        }
        let handle = self.spawn(helper.label())?;
        self.record(format!("spawn {} {}", self.udid.as_str(), helper.label()));
        Ok(handle)
    }

    async fn release(&self) -> usize {
        let reclaimed = match self.supervisor.as_ref() {
            Some(supervisor) => supervisor.kill_owned_by(&self.udid).await,
            None => 0,
        };
        self.record(format!("release {}", self.udid.as_str()));
        reclaimed
    }
}

// ─── Driver ─────────────────────────────────────────────────────

/// Scriptable driver client.
pub struct MockDriver {
    ready: AtomicBool,
    sessions_created: AtomicUsize,
    session_valid: AtomicBool,
    elements: Mutex<HashMap<String, String>>,
    stale: Mutex<HashSet<String>>,
    alert: Mutex<Option<String>>,
    /// Element ids clicked, in order.
    pub clicks: Mutex<Vec<String>>,
    window: WindowSize,
    source: String,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            sessions_created: AtomicUsize::new(0),
            session_valid: AtomicBool::new(true),
            elements: Mutex::new(HashMap::new()),
            stale: Mutex::new(HashSet::new()),
            alert: Mutex::new(None),
            clicks: Mutex::new(vec![]),
            window: WindowSize {
                width: 390,
                height: 844,
            },
            source: "<XCUIElementTypeApplication/>".into(),
        }
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A driver that never reports ready.
    pub fn unready() -> Self {
        let driver = Self::default();
        driver.set_ready(false);
        driver
    }

    pub fn with_element(self, label: &str, id: &str) -> Self {
        self.elements.lock().insert(label.to_string(), id.to_string());
        self
    }

    pub fn with_alert(self, text: &str) -> Self {
        *self.alert.lock() = Some(text.to_string());
        self
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Mark an element id as gone from the UI.
    pub fn make_stale(&self, id: &str) {
        self.stale.lock().insert(id.to_string());
    }

    /// Expire the current session on the driver side.
    pub fn expire_sessions(&self) {
        self.session_valid.store(false, Ordering::SeqCst);
    }

    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverClient for MockDriver {
    async fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    async fn create_session(&self) -> Result<String> {
        let n = self.sessions_created.fetch_add(1, Ordering::SeqCst) + 1;
        self.session_valid.store(true, Ordering::SeqCst);
        Ok(format!("session-{n}"))
    }

    async fn session_alive(&self, _session_id: &str) -> Result<bool> {
        Ok(self.session_valid.load(Ordering::SeqCst))
    }

    async fn window_size(&self, _session_id: &str) -> Result<WindowSize> {
        Ok(self.window)
    }

    async fn source(&self, _session_id: &str) -> Result<String> {
        Ok(self.source.clone())
    }

    async fn alert_info(&self, _session_id: &str) -> Result<AlertInfo> {
        let alert = self.alert.lock().clone();
        Ok(match alert {
            Some(text) => AlertInfo {
                present: true,
                text: Some(text),
                buttons: vec![],
            },
            None => AlertInfo::none(),
        })
    }

    async fn find_by_label(&self, _session_id: &str, label: &str) -> Result<Option<ElementHandle>> {
        Ok(self.elements.lock().get(label).cloned().map(ElementHandle))
    }

    async fn click(&self, _session_id: &str, element: &ElementHandle) -> Result<()> {
        if self.stale.lock().contains(element.id()) {
            return Err(AgentError::StaleHandle(element.id().to_string()));
        }
        self.clicks.lock().push(element.id().to_string());
        Ok(())
    }
}
