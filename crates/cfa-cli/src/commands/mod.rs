use clap::{Parser, Subcommand};
use std::path::PathBuf;

use cfa_config::{ConfigLoader, ConfigPaths};
use cfa_core::DeviceId;
use cfa_runtime::AgentContext;

mod agent;
mod session;

/// Options accepted with a single leading dash.
const LONG_FLAGS: &[&str] = &[
    "debug",
    "warn",
    "config",
    "defaults",
    "calculated",
    "id",
    "label",
    "nosanity",
];

/// On-host agent for physical iOS test devices
#[derive(Parser, Debug)]
#[command(name = "cfagent", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug logging
    #[arg(long, global = true, conflicts_with = "warn")]
    debug: bool,

    /// Only log warnings and errors
    #[arg(long, global = true)]
    warn: bool,

    /// Main config file
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Defaults config file
    #[arg(long, global = true, value_name = "FILE")]
    defaults: Option<PathBuf>,

    /// Calculated config file (highest precedence)
    #[arg(long, global = true, value_name = "FILE")]
    calculated: Option<PathBuf>,

    /// Device id (defaults to the first attached device)
    #[arg(long, global = true, value_name = "UDID")]
    id: Option<String>,

    /// Element label, for clickEl
    #[arg(long, global = true)]
    label: Option<String>,

    /// Skip sanity checks
    #[arg(long, global = true)]
    nosanity: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
enum Commands {
    /// Register and start every attached device, run until signalled
    Run,
    /// Announce attached devices to the control floor
    Register,
    /// Kill helper processes left behind by earlier runs
    Cleanup,
    /// Start WDA on one device and keep it running until signalled
    Wda,
    /// Print the device's window size
    Winsize,
    /// Print the UI hierarchy of the foreground app
    Source,
    /// Print alert state as JSON
    Alertinfo,
    /// Tap the element with the given -label
    #[command(name = "clickEl")]
    ClickEl,
    /// Stream backup video until signalled
    Vidtest,
}

/// Rewrite `-name` / `-name=value` into `--name` form for known options.
pub fn normalize_args<I, S>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    args.into_iter()
        .map(Into::into)
        .map(|arg| {
            let Some(rest) = arg.strip_prefix('-') else {
                return arg;
            };
            if rest.starts_with('-') {
                return arg;
            }
            let name = rest.split('=').next().unwrap_or(rest);
            if LONG_FLAGS.contains(&name) {
                format!("-{arg}")
            } else {
                arg
            }
        })
        .collect()
}

impl Cli {
    /// Parse the process arguments, accepting single-dash long options.
    pub fn parse_normalized() -> Self {
        Self::parse_from(normalize_args(std::env::args()))
    }

    pub async fn run(self) -> cfa_core::Result<()> {
        let paths = ConfigPaths::from_overrides(
            self.config.as_deref(),
            self.defaults.as_deref(),
            self.calculated.as_deref(),
        );
        let config_loader = ConfigLoader::load(&paths)?;
        let config = config_loader.get();

        // Resolve log level: -debug > -warn > info
        let log_level = if self.debug {
            "debug"
        } else if self.warn {
            "warn"
        } else {
            "info"
        };

        let filter = || {
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level))
        };
        if config.logging.format == "json" {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .json()
                .with_target(true)
                .init();
        } else {
            tracing_subscriber::fmt()
                .with_env_filter(filter())
                .without_time()
                .with_target(false)
                .init();
        }
        config_loader.log_notices();

        let ctx = AgentContext::new(config);
        let id = self.id.map(DeviceId::new);
        let id = id.as_ref();

        match self.command {
            Commands::Run => agent::cmd_run(&ctx, self.nosanity || ctx.config.sanity.skip).await,
            Commands::Register => agent::cmd_register(&ctx).await,
            Commands::Cleanup => agent::cmd_cleanup(&ctx).await,
            Commands::Wda => agent::cmd_wda(&ctx, id).await,
            Commands::Vidtest => agent::cmd_vidtest(&ctx, id).await,
            Commands::Winsize => session::cmd_winsize(&ctx, id).await,
            Commands::Source => session::cmd_source(&ctx, id).await,
            Commands::Alertinfo => session::cmd_alertinfo(&ctx, id).await,
            Commands::ClickEl => session::cmd_click(&ctx, id, self.label).await,
        }
        Ok(())
    }
}

/// Heartbeat tick: one dot per interval.
pub(crate) fn dot(_tick: u64) {
    use std::io::Write;
    print!(". ");
    let _ = std::io::stdout().flush();
}

pub(crate) fn print_device(id: &DeviceId) {
    println!("Dev id: {id}");
}
