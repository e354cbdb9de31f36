//! Helper process supervision.
//!
//! Every helper the agent launches (driver runners, port forwards, video
//! streams) is spawned through the [`ProcessSupervisor`], which stamps it with
//! the `CFAGENT_OWNER=<marker>` environment variable and records its pid.
//! [`ProcessSupervisor::cleanup`] later scans the OS process table for that
//! marker, so helpers leaked by a crashed run are reclaimed even though the
//! `Device` that spawned them no longer exists.
//!
//! Processes without the marker are never signalled.

use cfa_core::{AgentError, DeviceId, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// Environment variable carrying the ownership marker.
pub const MARKER_ENV: &str = "CFAGENT_OWNER";

// ─── Process table ──────────────────────────────────────────────

/// A process as seen by a [`ProcessTable`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Value of [`MARKER_ENV`] in the process environment, if any.
    pub marker: Option<String>,
}

/// Read/kill access to the OS process table.
pub trait ProcessTable: Send + Sync {
    fn list(&self) -> Vec<ProcessInfo>;

    /// Terminate `pid`. Returns `true` when the process is gone afterwards
    /// (including when it did not exist).
    fn kill(&self, pid: u32) -> bool;
}

/// [`ProcessTable`] backed by `sysinfo`.
#[derive(Debug, Default)]
pub struct SystemProcessTable;

impl ProcessTable for SystemProcessTable {
    fn list(&self) -> Vec<ProcessInfo> {
        let mut system = System::new();
        let refresh = ProcessRefreshKind::nothing().with_environ(UpdateKind::Always);
        system.refresh_processes_specifics(ProcessesToUpdate::All, true, refresh);

        system
            .processes()
            .iter()
            .map(|(pid, process)| ProcessInfo {
                pid: pid.as_u32(),
                name: process.name().to_string_lossy().into_owned(),
                marker: marker_from_environ(process.environ()),
            })
            .collect()
    }

    fn kill(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        match system.process(pid) {
            Some(process) => process.kill(),
            None => true,
        }
    }
}

fn marker_from_environ(environ: &[std::ffi::OsString]) -> Option<String> {
    let prefix = format!("{MARKER_ENV}=");
    environ.iter().find_map(|entry| {
        entry
            .to_str()
            .and_then(|s| s.strip_prefix(&prefix))
            .map(str::to_string)
    })
}

// ─── Supervisor ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Tracked {
    label: String,
    owner: Option<DeviceId>,
}

/// Outcome of a cleanup pass.
#[derive(Debug, Default, Clone)]
pub struct CleanupReport {
    pub killed: Vec<ProcessInfo>,
    pub failed: Vec<ProcessInfo>,
}

impl CleanupReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    /// `ProcessCleanupPartial` when any process survived.
    pub fn into_result(self) -> Result<()> {
        if self.failed.is_empty() {
            Ok(())
        } else {
            Err(AgentError::ProcessCleanupPartial {
                attempted: self.killed.len() + self.failed.len(),
                failed: self.failed.len(),
            })
        }
    }
}

/// Shared registry of tool-owned helper processes.
pub struct ProcessSupervisor {
    marker: String,
    table: Arc<dyn ProcessTable>,
    tracked: Mutex<HashMap<u32, Tracked>>,
}

impl ProcessSupervisor {
    pub fn new(marker: impl Into<String>, table: Arc<dyn ProcessTable>) -> Arc<Self> {
        Arc::new(Self {
            marker: marker.into(),
            table,
            tracked: Mutex::new(HashMap::new()),
        })
    }

    /// Supervisor over the real OS process table.
    pub fn system(marker: impl Into<String>) -> Arc<Self> {
        Self::new(marker, Arc::new(SystemProcessTable))
    }

    pub fn marker(&self) -> &str {
        &self.marker
    }

    /// Spawn a helper stamped with the ownership marker.
    pub fn spawn(
        self: &Arc<Self>,
        mut command: Command,
        label: &str,
        owner: Option<&DeviceId>,
    ) -> Result<ProcessHandle> {
        command
            .env(MARKER_ENV, &self.marker)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| AgentError::transport(label, "helper exited before it was tracked"))?;

        self.track(pid, label, owner);
        info!(pid, label, "spawned helper");
        Ok(ProcessHandle {
            pid,
            label: label.to_string(),
            child: Some(child),
            supervisor: Arc::clone(self),
        })
    }

    /// Track a marked process that was started by other means.
    pub fn adopt(self: &Arc<Self>, pid: u32, label: &str, owner: Option<&DeviceId>) -> ProcessHandle {
        self.track(pid, label, owner);
        debug!(pid, label, "adopted helper");
        ProcessHandle {
            pid,
            label: label.to_string(),
            child: None,
            supervisor: Arc::clone(self),
        }
    }

    fn track(&self, pid: u32, label: &str, owner: Option<&DeviceId>) {
        self.tracked.lock().insert(
            pid,
            Tracked {
                label: label.to_string(),
                owner: owner.cloned(),
            },
        );
    }

    fn forget(&self, pid: u32) {
        self.tracked.lock().remove(&pid);
    }

    /// Pids currently tracked in this process lifetime.
    pub fn tracked_pids(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.tracked.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    /// Every live process carrying this supervisor's marker.
    pub async fn owned_processes(&self) -> Vec<ProcessInfo> {
        let table = Arc::clone(&self.table);
        let marker = self.marker.clone();
        tokio::task::spawn_blocking(move || marked(table.as_ref(), &marker))
            .await
            .unwrap_or_default()
    }

    /// Kill every tracked helper belonging to `owner`. Returns how many were reclaimed.
    pub async fn kill_owned_by(&self, owner: &DeviceId) -> usize {
        let pids: Vec<u32> = self
            .tracked
            .lock()
            .iter()
            .filter(|(_, t)| t.owner.as_ref() == Some(owner))
            .map(|(pid, _)| *pid)
            .collect();
        if pids.is_empty() {
            return 0;
        }

        let table = Arc::clone(&self.table);
        let marker = self.marker.clone();
        let report = tokio::task::spawn_blocking(move || {
            let targets = marked(table.as_ref(), &marker)
                .into_iter()
                .filter(|p| pids.contains(&p.pid))
                .collect();
            kill_all(table.as_ref(), targets)
        })
        .await
        .unwrap_or_default();

        self.settle(&report);
        for p in &report.failed {
            warn!(pid = p.pid, name = %p.name, udid = %owner, "failed to kill device helper");
        }
        report.killed.len()
    }

    /// Kill every process bearing the marker, tracked or not.
    ///
    /// Individual kill failures are logged and reported, never raised.
    pub async fn cleanup(&self) -> CleanupReport {
        let table = Arc::clone(&self.table);
        let marker = self.marker.clone();
        let report = match tokio::task::spawn_blocking(move || {
            let targets = marked(table.as_ref(), &marker);
            kill_all(table.as_ref(), targets)
        })
        .await
        {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "process scan panicked");
                CleanupReport::default()
            }
        };

        self.settle(&report);
        for p in &report.killed {
            info!(pid = p.pid, name = %p.name, "killed leftover helper");
        }
        if !report.is_clean() {
            for p in &report.failed {
                warn!(pid = p.pid, name = %p.name, "could not kill leftover helper");
            }
            if let Err(e) = report.clone().into_result() {
                warn!(error = %e, "cleanup incomplete");
            }
        }
        report
    }

    fn settle(&self, report: &CleanupReport) {
        let mut tracked = self.tracked.lock();
        for p in &report.killed {
            if let Some(t) = tracked.remove(&p.pid) {
                debug!(pid = p.pid, label = %t.label, "untracked killed helper");
            }
        }
    }
}

fn marked(table: &dyn ProcessTable, marker: &str) -> Vec<ProcessInfo> {
    let own = std::process::id();
    table
        .list()
        .into_iter()
        .filter(|p| p.pid != own && p.marker.as_deref() == Some(marker))
        .collect()
}

fn kill_all(table: &dyn ProcessTable, targets: Vec<ProcessInfo>) -> CleanupReport {
    let mut report = CleanupReport::default();
    for target in targets {
        if table.kill(target.pid) {
            report.killed.push(target);
        } else {
            report.failed.push(target);
        }
    }
    report
}

// ─── Handle ─────────────────────────────────────────────────────

/// A tool-owned helper process.
///
/// Dropping a handle that owns its child kills the child; adopted handles
/// leave the process to [`ProcessSupervisor::cleanup`].
pub struct ProcessHandle {
    pid: u32,
    label: String,
    child: Option<Child>,
    supervisor: Arc<ProcessSupervisor>,
}

impl ProcessHandle {
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Terminate the helper and stop tracking it.
    pub async fn kill(mut self) -> Result<()> {
        let result = match self.child.take() {
            Some(mut child) => match child.kill().await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err(AgentError::Io(e)),
            },
            None => {
                let table = Arc::clone(&self.supervisor.table);
                let pid = self.pid;
                let gone = tokio::task::spawn_blocking(move || table.kill(pid))
                    .await
                    .unwrap_or(false);
                if gone {
                    Ok(())
                } else {
                    Err(AgentError::ProcessCleanupPartial {
                        attempted: 1,
                        failed: 1,
                    })
                }
            }
        };
        if result.is_ok() {
            self.supervisor.forget(self.pid);
        }
        debug!(pid = self.pid, label = %self.label, ok = result.is_ok(), "helper killed");
        result
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        // kill_on_drop reaps owned children; adopted pids stay tracked for cleanup.
        if self.child.is_some() {
            self.supervisor.forget(self.pid);
        }
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("label", &self.label)
            .finish()
    }
}
