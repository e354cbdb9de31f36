//! Command flows.
//!
//! Every flow cleans up tool-owned processes before it touches a device and
//! again after the tracker has shut down, on success, failure and signal
//! alike. The signal listener is installed for the whole flow, so a signal
//! that lands while a driver is still starting is handled too.

use cfa_core::{AgentError, DeviceId, Result};
use cfa_device::sanity::{SanityCheck, run_checks};
use cfa_device::{CleanupReport, StartMode, WdaController};
use std::future::Future;
use tracing::{info, warn};

use crate::context::AgentContext;
use crate::register::{DeviceRegistration, RegistrationClient};
use crate::shutdown::run_heartbeat;

/// Kill leftover helpers from this or earlier runs.
pub async fn cleanup(ctx: &AgentContext) -> CleanupReport {
    let report = ctx.supervisor.cleanup().await;
    if !report.killed.is_empty() || !report.failed.is_empty() {
        info!(
            killed = report.killed.len(),
            failed = report.failed.len(),
            "process cleanup"
        );
    }
    report
}

/// Shut the tracker down (once) and clean up.
pub async fn finish(ctx: &AgentContext) -> CleanupReport {
    ctx.shutdown.trigger().await;
    cleanup(ctx).await
}

/// Run `body` with the signal listener installed, then [`finish`].
///
/// A shutdown that completes while `body` is still pending abandons it with
/// [`AgentError::Interrupted`].
async fn guarded<T>(ctx: &AgentContext, body: impl Future<Output = Result<T>>) -> Result<T> {
    let listener = ctx.shutdown.spawn_listener();
    let token = ctx.token();
    let result = tokio::select! {
        biased;
        result = body => result,
        _ = token.cancelled() => {
            info!("flow interrupted by shutdown");
            Err(AgentError::Interrupted)
        }
    };
    finish(ctx).await;
    let _ = listener.await;
    result
}

/// Tick the heartbeat until shutdown.
async fn heartbeat_until_shutdown(ctx: &AgentContext, on_tick: impl FnMut(u64)) -> u64 {
    run_heartbeat(ctx.token(), ctx.heartbeat_interval(), on_tick).await
}

/// Clean up, pick a device and register it with the tracker.
pub async fn prepare_device(ctx: &AgentContext, filter: Option<&DeviceId>) -> Result<DeviceId> {
    cleanup(ctx).await;
    let id = ctx.tracker.discover(filter).await?;
    ctx.tracker.register(&id).await?;
    Ok(id)
}

/// Start WDA on a registered device, make sure a session exists, run `op`,
/// then stop the session whatever `op` returned.
pub async fn with_session<T, F, Fut>(ctx: &AgentContext, id: &DeviceId, op: F) -> Result<T>
where
    F: FnOnce(WdaController) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    ctx.tracker.start_wda(id, StartMode::Wait).await?;
    let wda = ctx
        .tracker
        .wda(id)
        .await
        .ok_or_else(|| AgentError::DeviceNotFound(id.clone()))?;

    let result = match wda.ensure_session().await {
        Ok(_) => op(wda).await,
        Err(e) => Err(e),
    };

    if let Err(e) = ctx.tracker.stop_wda(id).await {
        warn!(udid = %id, error = %e, "failed to stop wda");
    }
    result
}

/// One-shot session command against a single device.
///
/// `on_device` sees the selected identifier before WDA is started.
pub async fn run_single<T, F, Fut>(
    ctx: &AgentContext,
    filter: Option<&DeviceId>,
    on_device: impl FnOnce(&DeviceId),
    op: F,
) -> Result<T>
where
    F: FnOnce(WdaController) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    guarded(ctx, async {
        let id = prepare_device(ctx, filter).await?;
        on_device(&id);
        with_session(ctx, &id, op).await
    })
    .await
}

/// Full agent: every attached device is registered and its WDA started;
/// runs until a signal. Returns the number of heartbeat ticks.
pub async fn run_agent(
    ctx: &AgentContext,
    checks: &[Box<dyn SanityCheck>],
    skip_sanity: bool,
    on_tick: impl FnMut(u64),
) -> Result<u64> {
    guarded(ctx, async {
        cleanup(ctx).await;
        if skip_sanity {
            info!("sanity checks skipped");
        } else {
            run_checks(&ctx.config, checks).await.into_result()?;
        }

        let ids = ctx.tracker.bridge().discover().await?;
        if ids.is_empty() {
            return Err(AgentError::NoDevices);
        }
        for id in &ids {
            ctx.tracker.register(id).await?;
            ctx.tracker.start_wda(id, StartMode::Detached).await?;
        }
        info!(devices = ids.len(), "agent running");

        Ok(heartbeat_until_shutdown(ctx, on_tick).await)
    })
    .await
}

/// Start WDA on one device without waiting, then run until a signal.
pub async fn run_wda(
    ctx: &AgentContext,
    filter: Option<&DeviceId>,
    on_device: impl FnOnce(&DeviceId),
    on_tick: impl FnMut(u64),
) -> Result<u64> {
    guarded(ctx, async {
        let id = prepare_device(ctx, filter).await?;
        on_device(&id);
        ctx.tracker.start_wda(&id, StartMode::Detached).await?;
        Ok(heartbeat_until_shutdown(ctx, on_tick).await)
    })
    .await
}

/// Start the backup video stream on one device, then run until a signal.
pub async fn run_vidtest(
    ctx: &AgentContext,
    filter: Option<&DeviceId>,
    on_device: impl FnOnce(&DeviceId),
    on_tick: impl FnMut(u64),
) -> Result<u64> {
    guarded(ctx, async {
        let id = prepare_device(ctx, filter).await?;
        on_device(&id);
        let port = ctx.tracker.start_backup_video(&id).await?;
        info!(udid = %id, port, "backup video streaming");
        Ok(heartbeat_until_shutdown(ctx, on_tick).await)
    })
    .await
}

/// Announce every attached device to the control floor. Returns how many
/// registrations were accepted.
pub async fn register_devices(ctx: &AgentContext, client: &RegistrationClient) -> Result<usize> {
    guarded(ctx, async {
        cleanup(ctx).await;
        let ids = ctx.tracker.bridge().discover().await?;
        if ids.is_empty() {
            return Err(AgentError::NoDevices);
        }
        for id in &ids {
            ctx.tracker.register(id).await?;
        }

        let mut accepted = 0;
        let mut failures = vec![];
        for snapshot in ctx.tracker.snapshot().await {
            let registration = DeviceRegistration::from_snapshot(&snapshot, client.provider());
            match client.register(&registration).await {
                Ok(()) => accepted += 1,
                Err(e) => {
                    warn!(udid = %snapshot.udid, error = %e, "registration failed");
                    failures.push(format!("{}: {e}", snapshot.udid));
                }
            }
        }

        if failures.is_empty() {
            Ok(accepted)
        } else {
            Err(AgentError::Registration(failures.join("; ")))
        }
    })
    .await
}
