use cfa_core::{BridgeKind, WdaMethod};
use serde::{Deserialize, Serialize};

/// Root configuration: the merge of `default.json`, `config.json` and `calculated.json`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentConfig {
    /// Device communication backend, selected once at startup.
    pub bridge: BridgeKind,
    pub wda: WdaConfig,
    pub tools: ToolsConfig,
    pub process: ProcessConfig,
    pub sanity: SanityConfig,
    pub video: VideoConfig,
    pub control_floor: ControlFloorConfig,
    pub logging: LoggingConfig,
}

// ── WDA ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WdaConfig {
    /// "standard" spawns the driver through the bridge, "manual" only connects.
    pub method: WdaMethod,
    /// First local port handed out to devices; each device gets the next free one.
    pub base_port: u16,
    /// Port the driver listens on, on the device side.
    pub remote_port: u16,
    /// Host the forwarded driver port is reachable on.
    pub host: String,
    pub bundle_id: String,
    pub test_runner_bundle_id: String,
    pub xctest_config: String,
    /// Seconds to wait for the driver to answer `/status` after launch.
    pub start_timeout_secs: u64,
    /// Seconds `ensure_session` waits for the driver before giving up.
    pub session_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for WdaConfig {
    fn default() -> Self {
        Self {
            method: WdaMethod::Standard,
            base_port: 8100,
            remote_port: 8100,
            host: "127.0.0.1".into(),
            bundle_id: "com.facebook.WebDriverAgentRunner.xctrunner".into(),
            test_runner_bundle_id: "com.facebook.WebDriverAgentRunner.xctrunner".into(),
            xctest_config: "WebDriverAgentRunner.xctest".into(),
            start_timeout_secs: 60,
            session_timeout_secs: 30,
            poll_interval_ms: 500,
        }
    }
}

// ── External tools ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ToolsConfig {
    pub go_ios_path: String,
    pub iosif_path: String,
    /// Timeout for one-shot tool invocations such as device listing.
    pub command_timeout_secs: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            go_ios_path: "ios".into(),
            iosif_path: "iosif".into(),
            command_timeout_secs: 30,
        }
    }
}

// ── Process supervision ────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProcessConfig {
    /// Value of the ownership marker stamped on every spawned helper.
    pub marker: String,
    pub heartbeat_interval_ms: u64,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            marker: "cfagent".into(),
            heartbeat_interval_ms: 1000,
        }
    }
}

// ── Sanity checks ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SanityConfig {
    /// Skip preflight checks. Process cleanup still runs.
    pub skip: bool,
    /// Extra executables that must be on PATH.
    pub required_tools: Vec<String>,
    /// Verify the driver base port can be bound.
    pub check_ports: bool,
}

impl Default for SanityConfig {
    fn default() -> Self {
        Self {
            skip: false,
            required_tools: vec![],
            check_ports: true,
        }
    }
}

// ── Backup video ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VideoConfig {
    pub enabled: bool,
    pub base_port: u16,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_port: 8200,
        }
    }
}

// ── Control plane ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControlFloorConfig {
    /// Base URL of the control plane, e.g. "https://floor.example.com".
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Name this provider registers under.
    pub provider_name: String,
}

impl Default for ControlFloorConfig {
    fn default() -> Self {
        Self {
            url: None,
            username: None,
            password: None,
            provider_name: "cfagent".into(),
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// "text" or "json".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: "text".into(),
        }
    }
}

impl AgentConfig {
    /// Path of the executable backing the configured bridge.
    pub fn bridge_tool(&self) -> &str {
        match self.bridge {
            BridgeKind::GoIos => &self.tools.go_ios_path,
            BridgeKind::IosIf => &self.tools.iosif_path,
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let icon = match self.severity {
            WarningSeverity::Error => "❌",
            WarningSeverity::Warning => "⚠️ ",
            WarningSeverity::Info => "💡",
        };
        write!(f, "{} {}: {}", icon, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, "\n   ↳ {}", h)?;
        }
        Ok(())
    }
}

impl AgentConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Ports ───
        if self.wda.base_port == 0 {
            warnings.push(ConfigWarning {
                field: "wda.basePort".into(),
                message: "base port is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 8100".into()),
            });
        }
        if self.wda.remote_port == 0 {
            warnings.push(ConfigWarning {
                field: "wda.remotePort".into(),
                message: "remote port is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("WebDriverAgent listens on 8100 by default".into()),
            });
        }
        if self.video.enabled && self.video.base_port == self.wda.base_port {
            warnings.push(ConfigWarning {
                field: "video.basePort".into(),
                message: format!("collides with wda.basePort {}", self.wda.base_port),
                severity: WarningSeverity::Error,
                hint: Some("Pick a separate port range for backup video".into()),
            });
        }

        // ── Bridge tool ───
        if self.bridge_tool().trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "tools".into(),
                message: format!("no executable configured for bridge '{}'", self.bridge),
                severity: WarningSeverity::Error,
                hint: Some("Set tools.goIosPath or tools.iosifPath".into()),
            });
        }

        // ── Driver launch ───
        if self.wda.method == cfa_core::WdaMethod::Standard
            && self.bridge == BridgeKind::GoIos
            && (self.wda.bundle_id.is_empty() || self.wda.xctest_config.is_empty())
        {
            warnings.push(ConfigWarning {
                field: "wda.bundleId".into(),
                message: "go-ios needs a bundle id and xctest config to launch the driver".into(),
                severity: WarningSeverity::Error,
                hint: Some("Fill in wda.bundleId, wda.testRunnerBundleId and wda.xctestConfig".into()),
            });
        }
        if self.wda.start_timeout_secs == 0 || self.wda.session_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "wda".into(),
                message: "zero timeout, the driver can never become ready".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }
        if self.wda.poll_interval_ms == 0 {
            warnings.push(ConfigWarning {
                field: "wda.pollIntervalMs".into(),
                message: "poll interval is 0, readiness polling will spin".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set to e.g. 500".into()),
            });
        }

        // ── Process ───
        if self.process.marker.trim().is_empty() {
            warnings.push(ConfigWarning {
                field: "process.marker".into(),
                message: "marker is empty, leftover helpers cannot be identified".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 'cfagent'".into()),
            });
        }
        if self.process.heartbeat_interval_ms == 0 {
            warnings.push(ConfigWarning {
                field: "process.heartbeatIntervalMs".into(),
                message: "heartbeat interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 1000".into()),
            });
        }

        // ── Control plane ───
        if self.control_floor.url.is_none() {
            warnings.push(ConfigWarning {
                field: "controlFloor.url".into(),
                message: "not set, devices will not be registered".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Logging ───
        if !["text", "json"].contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some("Valid values: text, json".into()),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| w.to_string())
            .collect();
        if !errors.is_empty() {
            return Err(errors.join("\n"));
        }
        Ok(warnings)
    }
}
