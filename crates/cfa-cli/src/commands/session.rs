//! One-shot commands that need a live WDA session.

use cfa_core::{AgentError, DeviceId};
use cfa_runtime::{AgentContext, runner};

use super::print_device;

fn report(e: AgentError) {
    match e {
        AgentError::StartFailure { .. } | AgentError::SessionNotReady { .. } => {
            tracing::debug!(error = %e, "wda unavailable");
            println!("Could not start/connect to WDA. Exiting");
        }
        other => println!("❌ {other}"),
    }
}

pub(super) async fn cmd_winsize(ctx: &AgentContext, id: Option<&DeviceId>) {
    match runner::run_single(ctx, id, print_device, |wda| async move { wda.window_size().await }).await {
        Ok(size) => println!("Width: {}, Height: {}", size.width, size.height),
        Err(e) => report(e),
    }
}

pub(super) async fn cmd_source(ctx: &AgentContext, id: Option<&DeviceId>) {
    match runner::run_single(ctx, id, print_device, |wda| async move { wda.source().await }).await {
        Ok(source) => println!("{source}"),
        Err(e) => report(e),
    }
}

pub(super) async fn cmd_alertinfo(ctx: &AgentContext, id: Option<&DeviceId>) {
    let result = runner::run_single(ctx, id, print_device, |wda| async move {
        wda.alert_info().await?.to_json()
    })
    .await;
    match result {
        Ok(json) => println!("{json}"),
        Err(e) => report(e),
    }
}

pub(super) async fn cmd_click(ctx: &AgentContext, id: Option<&DeviceId>, label: Option<String>) {
    let Some(label) = label.filter(|l| !l.is_empty()) else {
        println!("Must specify -label with clickEl");
        return;
    };

    let target = label.clone();
    let result = runner::run_single(ctx, id, print_device, |wda| async move {
        let element = wda.element_by_label(&target).await?;
        wda.click(&element).await
    })
    .await;
    match result {
        Ok(()) => println!("Clicked '{label}'"),
        Err(AgentError::ElementNotFound(_)) => println!("Element '{label}' not found"),
        Err(e) => report(e),
    }
}
