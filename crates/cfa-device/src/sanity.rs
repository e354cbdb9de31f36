//! Preflight checks run before any device is touched.

use async_trait::async_trait;
use cfa_config::{AgentConfig, WarningSeverity};
use cfa_core::{AgentError, Result};
use std::net::TcpListener;
use tracing::{debug, warn};

/// One independent preflight check.
#[async_trait]
pub trait SanityCheck: Send + Sync {
    fn name(&self) -> String;

    /// `Err` carries a human-readable reason.
    async fn check(&self, config: &AgentConfig) -> std::result::Result<(), String>;
}

/// A command-line tool must be resolvable on `PATH`.
pub struct ToolOnPath(pub String);

#[async_trait]
impl SanityCheck for ToolOnPath {
    fn name(&self) -> String {
        format!("tool:{}", self.0)
    }

    async fn check(&self, _config: &AgentConfig) -> std::result::Result<(), String> {
        which::which(&self.0)
            .map(|path| debug!(tool = %self.0, path = %path.display(), "tool found"))
            .map_err(|_| format!("`{}` not found on PATH", self.0))
    }
}

/// A local TCP port must be free to bind.
pub struct PortAvailable(pub u16);

#[async_trait]
impl SanityCheck for PortAvailable {
    fn name(&self) -> String {
        format!("port:{}", self.0)
    }

    async fn check(&self, _config: &AgentConfig) -> std::result::Result<(), String> {
        TcpListener::bind(("127.0.0.1", self.0))
            .map(drop)
            .map_err(|e| format!("port {} unavailable: {e}", self.0))
    }
}

/// The configuration must validate without errors.
pub struct ConfigComplete;

#[async_trait]
impl SanityCheck for ConfigComplete {
    fn name(&self) -> String {
        "config".into()
    }

    async fn check(&self, config: &AgentConfig) -> std::result::Result<(), String> {
        let warnings = config.validate()?;
        for w in warnings.iter().filter(|w| w.severity == WarningSeverity::Warning) {
            warn!(field = %w.field, "{}", w.message);
        }
        Ok(())
    }
}

/// The checks `run` performs by default for `config`.
pub fn default_checks(config: &AgentConfig) -> Vec<Box<dyn SanityCheck>> {
    let mut checks: Vec<Box<dyn SanityCheck>> = vec![
        Box::new(ConfigComplete),
        Box::new(ToolOnPath(config.bridge_tool().to_string())),
    ];
    checks.extend(
        config
            .sanity
            .required_tools
            .iter()
            .map(|tool| Box::new(ToolOnPath(tool.clone())) as Box<dyn SanityCheck>),
    );
    if config.sanity.check_ports {
        checks.push(Box::new(PortAvailable(config.wda.base_port)));
        if config.video.enabled {
            checks.push(Box::new(PortAvailable(config.video.base_port)));
        }
    }
    checks
}

/// Outcome of one check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SanityReport {
    pub results: Vec<CheckResult>,
}

impl SanityReport {
    pub fn passed(&self) -> bool {
        self.results.iter().all(|r| r.error.is_none())
    }

    /// `name: reason` for every failed check.
    pub fn failures(&self) -> Vec<String> {
        self.results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}", r.name)))
            .collect()
    }

    /// `SanityCheckFailed` listing every failure.
    pub fn into_result(self) -> Result<()> {
        if self.passed() {
            Ok(())
        } else {
            Err(AgentError::SanityCheckFailed(self.failures()))
        }
    }
}

/// Run every check; one failure does not stop the others.
pub async fn run_checks(config: &AgentConfig, checks: &[Box<dyn SanityCheck>]) -> SanityReport {
    let mut report = SanityReport::default();
    for check in checks {
        let name = check.name();
        let error = check.check(config).await.err();
        match &error {
            Some(reason) => warn!(check = %name, reason = %reason, "sanity check failed"),
            None => debug!(check = %name, "sanity check passed"),
        }
        report.results.push(CheckResult { name, error });
    }
    report
}
