use cfa_core::DeviceId;
use cfa_device::sanity::default_checks;
use cfa_runtime::{AgentContext, RegistrationClient, runner};

use super::{dot, print_device};

pub(super) async fn cmd_run(ctx: &AgentContext, skip_sanity: bool) {
    let checks = default_checks(&ctx.config);
    match runner::run_agent(ctx, &checks, skip_sanity, dot).await {
        Ok(ticks) => {
            println!();
            tracing::info!(ticks, "agent stopped");
        }
        Err(e) => println!("❌ {e}"),
    }
}

pub(super) async fn cmd_register(ctx: &AgentContext) {
    let client = match RegistrationClient::from_config(&ctx.config.control_floor) {
        Ok(client) => client,
        Err(e) => {
            println!("❌ {e}");
            return;
        }
    };
    match runner::register_devices(ctx, &client).await {
        Ok(count) => println!("Registered {count} device(s) with {}", client.endpoint()),
        Err(e) => println!("❌ {e}"),
    }
}

pub(super) async fn cmd_cleanup(ctx: &AgentContext) {
    let report = runner::cleanup(ctx).await;
    println!("Killed {} leftover process(es)", report.killed.len());
    for p in &report.failed {
        println!("⚠️  Could not kill {} (pid {})", p.name, p.pid);
    }
}

pub(super) async fn cmd_wda(ctx: &AgentContext, id: Option<&DeviceId>) {
    match runner::run_wda(ctx, id, print_device, dot).await {
        Ok(_) => println!(),
        Err(e) => println!("❌ {e}"),
    }
}

pub(super) async fn cmd_vidtest(ctx: &AgentContext, id: Option<&DeviceId>) {
    match runner::run_vidtest(ctx, id, print_device, dot).await {
        Ok(_) => println!(),
        Err(e) => println!("❌ {e}"),
    }
}
