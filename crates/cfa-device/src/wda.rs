//! WebDriverAgent session lifecycle for one device.
//!
//! ```text
//!   Idle ──start()──▶ Starting ──▶ Running ──stop()──▶ Stopping ──▶ Idle
//!     ▲                  │
//!     └──── start() ── Failed
//! ```
//!
//! [`WdaController::start`] returns a [`PendingStart`] immediately; a
//! background task runs the configured strategy and resolves it exactly once
//! to a [`StartOutcome`]. A running session is stopped through the
//! [`RunningWda`] handle, which is consumed by [`RunningWda::stop`].

use cfa_config::AgentConfig;
use cfa_core::{AgentError, DeviceId, Result, WdaMethod};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::bridge::{HelperKind, PortForward, Transport};
use crate::driver::{AlertInfo, DriverClient, ElementHandle, WindowSize};
use crate::process::ProcessHandle;

/// Driver did not become ready before the start timeout.
pub const CODE_NOT_READY: i32 = 1;
/// The driver helper could not be launched.
pub const CODE_SPAWN_FAILED: i32 = 2;
/// The driver port could not be forwarded.
pub const CODE_FORWARD_FAILED: i32 = 3;
/// The start task ended without reporting.
pub const CODE_ABORTED: i32 = 4;

// ─── Types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WdaState {
    Idle,
    Starting,
    Running,
    Failed,
    Stopping,
}

impl fmt::Display for WdaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WdaState::Idle => "idle",
            WdaState::Starting => "starting",
            WdaState::Running => "running",
            WdaState::Failed => "failed",
            WdaState::Stopping => "stopping",
        };
        f.write_str(s)
    }
}

/// Result of a start attempt.
#[derive(Debug)]
pub enum StartOutcome {
    Running(RunningWda),
    /// The strategy's helpers and forwards were already released.
    Failed { code: i32, reason: String },
}

impl StartOutcome {
    /// `0` when running, the failure code otherwise.
    pub fn code(&self) -> i32 {
        match self {
            StartOutcome::Running(_) => 0,
            StartOutcome::Failed { code, .. } => *code,
        }
    }

    pub fn into_result(self, udid: &DeviceId) -> Result<RunningWda> {
        match self {
            StartOutcome::Running(running) => Ok(running),
            StartOutcome::Failed { code, reason } => Err(AgentError::StartFailure {
                udid: udid.clone(),
                code,
                reason,
            }),
        }
    }
}

/// A start in progress. Dropping it before completion stops the session
/// as soon as it comes up.
#[derive(Debug)]
pub struct PendingStart {
    udid: DeviceId,
    rx: oneshot::Receiver<StartOutcome>,
}

impl PendingStart {
    pub fn udid(&self) -> &DeviceId {
        &self.udid
    }

    pub async fn wait(self) -> StartOutcome {
        self.rx.await.unwrap_or_else(|_| StartOutcome::Failed {
            code: CODE_ABORTED,
            reason: "start task ended without a result".into(),
        })
    }
}

#[derive(Debug)]
struct StopRequest {
    ack: oneshot::Sender<()>,
}

/// Handle to a running session. Dropping it also tears the session down.
#[derive(Debug)]
pub struct RunningWda {
    udid: DeviceId,
    stop_tx: mpsc::Sender<StopRequest>,
}

impl RunningWda {
    pub fn udid(&self) -> &DeviceId {
        &self.udid
    }

    /// Request teardown and wait until it has been acknowledged.
    ///
    /// Helpers are killed after the acknowledgement; use
    /// [`WdaController::wait_idle`] to wait for that.
    pub async fn stop(self) {
        let (ack, acked) = oneshot::channel();
        if self.stop_tx.send(StopRequest { ack }).await.is_ok() {
            let _ = acked.await;
        }
        debug!(udid = %self.udid, "stop acknowledged");
    }
}

/// Helpers owned by a running session.
struct SessionResources {
    driver: Option<ProcessHandle>,
    forward: PortForward,
}

impl SessionResources {
    async fn release(self, udid: &DeviceId) {
        if let Some(driver) = self.driver
            && let Err(e) = driver.kill().await
        {
            warn!(udid = %udid, error = %e, "failed to kill driver helper");
        }
        let local = self.forward.local;
        if let Err(e) = self.forward.close().await {
            warn!(udid = %udid, port = local, error = %e, "failed to close forward");
        }
    }
}

// ─── Controller ─────────────────────────────────────────────────

struct Inner {
    udid: DeviceId,
    config: Arc<AgentConfig>,
    transport: Arc<dyn Transport>,
    driver: Arc<dyn DriverClient>,
    wda_port: u16,
    state: watch::Sender<WdaState>,
    session: Mutex<Option<String>>,
}

/// Drives the WDA session of a single device.
#[derive(Clone)]
pub struct WdaController {
    inner: Arc<Inner>,
}

impl WdaController {
    pub fn new(
        udid: DeviceId,
        config: Arc<AgentConfig>,
        transport: Arc<dyn Transport>,
        driver: Arc<dyn DriverClient>,
        wda_port: u16,
    ) -> Self {
        let (state, _) = watch::channel(WdaState::Idle);
        Self {
            inner: Arc::new(Inner {
                udid,
                config,
                transport,
                driver,
                wda_port,
                state,
                session: Mutex::new(None),
            }),
        }
    }

    pub fn udid(&self) -> &DeviceId {
        &self.inner.udid
    }

    pub fn wda_port(&self) -> u16 {
        self.inner.wda_port
    }

    pub fn state(&self) -> WdaState {
        *self.inner.state.borrow()
    }

    fn set_state(&self, state: WdaState) {
        let previous = self.inner.state.send_replace(state);
        debug!(udid = %self.inner.udid, from = %previous, to = %state, "wda state");
    }

    /// Wait until the state satisfies `pred`.
    pub async fn wait_for(&self, pred: impl Fn(WdaState) -> bool) -> WdaState {
        let mut rx = self.inner.state.subscribe();
        match rx.wait_for(|s| pred(*s)).await {
            Ok(state) => *state,
            Err(_) => self.state(),
        }
    }

    pub async fn wait_idle(&self) {
        self.wait_for(|s| s == WdaState::Idle).await;
    }

    /// Begin starting the driver. Accepted from `Idle` or `Failed`.
    pub fn start(&self) -> Result<PendingStart> {
        let mut rejected = None;
        self.inner.state.send_if_modified(|state| match state {
            WdaState::Idle | WdaState::Failed => {
                *state = WdaState::Starting;
                true
            }
            other => {
                rejected = Some(*other);
                false
            }
        });
        if let Some(state) = rejected {
            return Err(AgentError::AlreadyStarted {
                udid: self.inner.udid.clone(),
                state: state.to_string(),
            });
        }

        info!(udid = %self.inner.udid, method = %self.inner.config.wda.method, port = self.inner.wda_port, "starting wda");
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        tokio::spawn(async move { this.run_start(tx).await });
        Ok(PendingStart {
            udid: self.inner.udid.clone(),
            rx,
        })
    }

    async fn run_start(self, tx: oneshot::Sender<StartOutcome>) {
        let started = match self.inner.config.wda.method {
            WdaMethod::Standard => self.start_standard().await,
            WdaMethod::Manual => self.start_manual().await,
        };

        match started {
            Ok(resources) => {
                let (stop_tx, stop_rx) = mpsc::channel(1);
                self.set_state(WdaState::Running);
                info!(udid = %self.inner.udid, "wda running");
                tokio::spawn(self.clone().teardown(resources, stop_rx));

                let running = RunningWda {
                    udid: self.inner.udid.clone(),
                    stop_tx,
                };
                if tx.send(StartOutcome::Running(running)).is_err() {
                    debug!(udid = %self.inner.udid, "start abandoned, stopping session");
                }
            }
            Err((code, reason)) => {
                self.set_state(WdaState::Failed);
                warn!(udid = %self.inner.udid, code, reason = %reason, "wda start failed");
                let _ = tx.send(StartOutcome::Failed { code, reason });
            }
        }
    }

    /// Launch the driver helper, forward its port, wait for readiness.
    async fn start_standard(&self) -> std::result::Result<SessionResources, (i32, String)> {
        let driver = self
            .inner
            .transport
            .spawn_helper(HelperKind::Driver)
            .await
            .map_err(|e| (CODE_SPAWN_FAILED, e.to_string()))?;

        let forward = match self.forward().await {
            Ok(forward) => forward,
            Err(e) => {
                let _ = driver.kill().await;
                return Err((CODE_FORWARD_FAILED, e.to_string()));
            }
        };

        self.await_ready(SessionResources {
            driver: Some(driver),
            forward,
        })
        .await
    }

    /// Forward the port to a driver started out of band, wait for readiness.
    async fn start_manual(&self) -> std::result::Result<SessionResources, (i32, String)> {
        let forward = self
            .forward()
            .await
            .map_err(|e| (CODE_FORWARD_FAILED, e.to_string()))?;
        self.await_ready(SessionResources {
            driver: None,
            forward,
        })
        .await
    }

    async fn forward(&self) -> Result<PortForward> {
        self.inner
            .transport
            .forward_port(self.inner.wda_port, self.inner.config.wda.remote_port)
            .await
    }

    async fn await_ready(
        &self,
        resources: SessionResources,
    ) -> std::result::Result<SessionResources, (i32, String)> {
        let wda = &self.inner.config.wda;
        let timeout = Duration::from_secs(wda.start_timeout_secs);
        if poll_until(timeout, poll_interval(&self.inner.config), || self.inner.driver.is_ready()).await {
            Ok(resources)
        } else {
            resources.release(&self.inner.udid).await;
            Err((
                CODE_NOT_READY,
                format!("driver not ready after {}s", wda.start_timeout_secs),
            ))
        }
    }

    async fn teardown(self, resources: SessionResources, mut stop_rx: mpsc::Receiver<StopRequest>) {
        let request = stop_rx.recv().await;
        self.set_state(WdaState::Stopping);
        if let Some(request) = request {
            let _ = request.ack.send(());
        }

        self.inner.session.lock().await.take();
        resources.release(&self.inner.udid).await;
        self.set_state(WdaState::Idle);
        info!(udid = %self.inner.udid, "wda stopped");
    }

    // ─── Session ────────────────────────────────────────────────

    fn require_running(&self) -> Result<()> {
        match self.state() {
            WdaState::Running => Ok(()),
            other => Err(AgentError::InvalidState {
                udid: self.inner.udid.clone(),
                reason: format!("wda is {other}"),
            }),
        }
    }

    /// Make sure a live driver session exists, creating one if needed.
    pub async fn ensure_session(&self) -> Result<String> {
        self.require_running()?;
        let driver = &self.inner.driver;
        let mut session = self.inner.session.lock().await;

        if let Some(id) = session.as_ref() {
            if driver.session_alive(id).await.unwrap_or(false) {
                return Ok(id.clone());
            }
            debug!(udid = %self.inner.udid, "session expired");
            *session = None;
        }

        let timeout_secs = self.inner.config.wda.session_timeout_secs;
        let deadline = Instant::now() + Duration::from_secs(timeout_secs);
        let poll = poll_interval(&self.inner.config);
        loop {
            self.require_running()?;
            if driver.is_ready().await {
                match driver.create_session().await {
                    Ok(id) => {
                        debug!(udid = %self.inner.udid, "session created");
                        *session = Some(id.clone());
                        return Ok(id);
                    }
                    Err(e) => debug!(udid = %self.inner.udid, error = %e, "session create failed"),
                }
            }
            if Instant::now() >= deadline {
                return Err(AgentError::SessionNotReady {
                    udid: self.inner.udid.clone(),
                    waited_secs: timeout_secs,
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    async fn session_id(&self) -> Result<String> {
        self.require_running()?;
        self.inner
            .session
            .lock()
            .await
            .clone()
            .ok_or_else(|| AgentError::InvalidState {
                udid: self.inner.udid.clone(),
                reason: "no session".into(),
            })
    }

    pub async fn window_size(&self) -> Result<WindowSize> {
        let sid = self.session_id().await?;
        self.inner.driver.window_size(&sid).await
    }

    pub async fn source(&self) -> Result<String> {
        let sid = self.session_id().await?;
        self.inner.driver.source(&sid).await
    }

    pub async fn alert_info(&self) -> Result<AlertInfo> {
        let sid = self.session_id().await?;
        self.inner.driver.alert_info(&sid).await
    }

    pub async fn element_by_label(&self, label: &str) -> Result<ElementHandle> {
        let sid = self.session_id().await?;
        self.inner
            .driver
            .find_by_label(&sid, label)
            .await?
            .ok_or_else(|| AgentError::ElementNotFound(label.to_string()))
    }

    pub async fn click(&self, element: &ElementHandle) -> Result<()> {
        let sid = self.session_id().await?;
        self.inner.driver.click(&sid, element).await
    }
}

impl fmt::Debug for WdaController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WdaController")
            .field("udid", &self.inner.udid)
            .field("port", &self.inner.wda_port)
            .field("state", &self.state())
            .finish()
    }
}

fn poll_interval(config: &AgentConfig) -> Duration {
    Duration::from_millis(config.wda.poll_interval_ms.max(10))
}

/// Poll `check` until it returns `true` or `timeout` elapses.
async fn poll_until<F, Fut>(timeout: Duration, interval: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
