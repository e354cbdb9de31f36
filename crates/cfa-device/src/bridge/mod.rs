//! Device bridges: discovery and per-device transports.
//!
//! A [`Bridge`] enumerates attached devices and hands out one [`Transport`]
//! per device. Two backends exist (`go-ios` and `iosif`); exactly one is
//! chosen by [`from_config`] at startup and kept for the process lifetime.
//!
//! Port forwards and driver runners are long-lived helper processes spawned
//! through the shared [`ProcessSupervisor`], so they are reclaimed by
//! [`Transport::release`] or, after a crash, by the supervisor's cleanup.

pub mod go_ios;
pub mod iosif;

use async_trait::async_trait;
use cfa_config::AgentConfig;
use cfa_core::{AgentError, BridgeKind, DeviceId, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;

use crate::process::{ProcessHandle, ProcessSupervisor};

pub use go_ios::GoIosBridge;
pub use iosif::IosIfBridge;

// ─── Traits ─────────────────────────────────────────────────────

/// Device discovery plus a transport factory for one backend.
#[async_trait]
pub trait Bridge: Send + Sync {
    fn kind(&self) -> BridgeKind;

    /// Attached devices, sorted so the first entry is stable across calls.
    async fn discover(&self) -> Result<Vec<DeviceId>>;

    /// A transport bound to `id`, of this bridge's variant.
    fn create_transport(&self, id: &DeviceId) -> Box<dyn Transport>;

    /// Release bridge-level resources. Called once, after every device is stopped.
    async fn shutdown(&self);
}

/// Low-level I/O for a single device.
#[async_trait]
pub trait Transport: Send + Sync {
    fn udid(&self) -> &DeviceId;

    fn kind(&self) -> BridgeKind;

    /// Attach the supervisor every helper is registered with.
    fn attach_supervisor(&mut self, supervisor: Arc<ProcessSupervisor>);

    /// Forward `local` on the host to `remote` on the device.
    async fn forward_port(&self, local: u16, remote: u16) -> Result<PortForward>;

    /// Launch a long-running helper for this device.
    async fn spawn_helper(&self, helper: HelperKind) -> Result<ProcessHandle>;

    /// Kill every helper this transport spawned. Returns how many were reclaimed.
    async fn release(&self) -> usize;
}

/// Long-running helpers a transport can launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperKind {
    /// The WebDriverAgent xctest runner.
    Driver,
    /// Backup video stream served on `port`.
    BackupVideo { port: u16 },
}

impl HelperKind {
    pub fn label(&self) -> &'static str {
        match self {
            HelperKind::Driver => "wda",
            HelperKind::BackupVideo { .. } => "backup-video",
        }
    }
}

/// An active port forward. Closing it (or dropping it) frees the local port.
#[derive(Debug)]
pub struct PortForward {
    pub local: u16,
    pub remote: u16,
    process: ProcessHandle,
}

impl PortForward {
    pub fn new(local: u16, remote: u16, process: ProcessHandle) -> Self {
        Self {
            local,
            remote,
            process,
        }
    }

    pub fn pid(&self) -> u32 {
        self.process.pid()
    }

    pub async fn close(self) -> Result<()> {
        self.process.kill().await
    }
}

/// Build the bridge selected by `config.bridge`.
pub fn from_config(config: &Arc<AgentConfig>) -> Arc<dyn Bridge> {
    match config.bridge {
        BridgeKind::GoIos => Arc::new(GoIosBridge::new(Arc::clone(config))),
        BridgeKind::IosIf => Arc::new(IosIfBridge::new(Arc::clone(config))),
    }
}

// ─── Shared plumbing ────────────────────────────────────────────

/// State common to both transport variants.
pub(crate) struct TransportCore {
    pub udid: DeviceId,
    pub kind: BridgeKind,
    pub program: String,
    supervisor: Option<Arc<ProcessSupervisor>>,
}

impl TransportCore {
    pub fn new(udid: DeviceId, kind: BridgeKind, program: String) -> Self {
        Self {
            udid,
            kind,
            program,
            supervisor: None,
        }
    }

    pub fn attach(&mut self, supervisor: Arc<ProcessSupervisor>) {
        self.supervisor = Some(supervisor);
    }

    fn supervisor(&self) -> Result<&Arc<ProcessSupervisor>> {
        self.supervisor
            .as_ref()
            .ok_or_else(|| AgentError::transport(self.kind, "no process supervisor attached"))
    }

    /// Spawn `program args...` as a helper owned by this device.
    pub fn spawn(&self, label: &str, args: &[String]) -> Result<ProcessHandle> {
        let supervisor = self.supervisor()?;
        let mut command = Command::new(&self.program);
        command.args(args);
        supervisor
            .spawn(command, label, Some(&self.udid))
            .map_err(|e| AgentError::transport(self.kind, format!("{label}: {e}")))
    }

    pub async fn release(&self) -> usize {
        match self.supervisor.as_ref() {
            Some(supervisor) => supervisor.kill_owned_by(&self.udid).await,
            None => 0,
        }
    }
}

/// Run a one-shot tool command and return stdout.
pub(crate) async fn run_tool(
    kind: BridgeKind,
    program: &str,
    args: &[&str],
    timeout: Duration,
) -> Result<String> {
    let output = tokio::time::timeout(timeout, Command::new(program).args(args).output())
        .await
        .map_err(|_| AgentError::transport(kind, format!("{program} timed out")))?
        .map_err(|e| AgentError::transport(kind, format!("{program} failed: {e}")))?;

    if output.status.success() {
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(AgentError::transport(
            kind,
            format!("{program} error: {}", stderr.trim()),
        ))
    }
}

/// Sort and dedup identifiers so default selection does not depend on backend order.
pub(crate) fn normalize(mut ids: Vec<DeviceId>) -> Vec<DeviceId> {
    ids.sort();
    ids.dedup();
    ids
}
