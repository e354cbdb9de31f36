//! A managed device: its transport, WDA controller and background tasks.

use cfa_config::AgentConfig;
use cfa_core::{DeviceId, Result};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::bridge::{HelperKind, Transport};
use crate::driver::DriverClient;
use crate::wda::{RunningWda, WdaController, WdaState};

/// Where a detached session handle lives until the device stops it.
#[derive(Debug, Default)]
pub(crate) enum SessionSlot {
    #[default]
    Empty,
    Held(RunningWda),
    /// The device is shutting down; late sessions are stopped on arrival.
    Closed,
}

/// The backup video stream of a device.
pub struct BackupTask {
    pub port: u16,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl BackupTask {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Kill the stream helper and wait for the task to finish.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "backup video task panicked");
        }
    }
}

pub struct Device {
    id: DeviceId,
    transport: Arc<dyn Transport>,
    wda: WdaController,
    video_port: u16,
    pub(crate) session: Arc<Mutex<SessionSlot>>,
    backup: Option<BackupTask>,
}

impl Device {
    pub fn new(
        id: DeviceId,
        config: Arc<AgentConfig>,
        transport: Arc<dyn Transport>,
        driver: Arc<dyn DriverClient>,
        wda_port: u16,
        video_port: u16,
    ) -> Self {
        let wda = WdaController::new(id.clone(), config, Arc::clone(&transport), driver, wda_port);
        Self {
            id,
            transport,
            wda,
            video_port,
            session: Arc::new(Mutex::new(SessionSlot::Empty)),
            backup: None,
        }
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn wda(&self) -> &WdaController {
        &self.wda
    }

    pub fn wda_port(&self) -> u16 {
        self.wda.wda_port()
    }

    pub fn video_port(&self) -> u16 {
        self.video_port
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn backup(&self) -> Option<&BackupTask> {
        self.backup.as_ref()
    }

    /// Start the backup video stream. A no-op if it is already running.
    pub async fn start_backup_video(&mut self) -> Result<u16> {
        if let Some(backup) = &self.backup
            && backup.is_running()
        {
            return Ok(backup.port);
        }

        let port = self.video_port;
        let helper = self
            .transport
            .spawn_helper(HelperKind::BackupVideo { port })
            .await?;
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let udid = self.id.clone();
        let task = tokio::spawn(async move {
            token.cancelled().await;
            if let Err(e) = helper.kill().await {
                warn!(udid = %udid, error = %e, "failed to stop backup video");
            }
        });

        info!(udid = %self.id, port, "backup video started");
        self.backup = Some(BackupTask { port, cancel, task });
        Ok(port)
    }

    /// Stop everything this device owns: the session, the backup stream and
    /// finally every helper still registered to its transport.
    pub async fn shutdown(&mut self) {
        // A start in flight resolves into the slot or stops itself once closed.
        self.wda.wait_for(|s| s != WdaState::Starting).await;

        let held = std::mem::replace(&mut *self.session.lock().await, SessionSlot::Closed);
        if let SessionSlot::Held(running) = held {
            running.stop().await;
            self.wda.wait_idle().await;
        }

        if let Some(backup) = self.backup.take() {
            backup.stop().await;
        }

        let reclaimed = self.transport.release().await;
        debug!(udid = %self.id, reclaimed, "device released");
    }
}

impl std::fmt::Debug for Device {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Device")
            .field("id", &self.id)
            .field("wda", &self.wda)
            .field("video_port", &self.video_port)
            .finish()
    }
}
