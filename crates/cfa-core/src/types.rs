use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Censor a device UDID for display: `***` followed by its last four characters.
///
/// Identifiers shorter than four characters keep all of their characters.
pub fn censor_udid(udid: &str) -> String {
    let chars: Vec<char> = udid.chars().collect();
    let start = chars.len().saturating_sub(4);
    let tail: String = chars[start..].iter().collect();
    format!("***{tail}")
}

/// Stable device identifier (UDID).
///
/// `Display` and `Debug` both render the censored form so identifiers never
/// leak into logs. Use [`DeviceId::as_str`] when the raw value must be passed
/// to a backend tool.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(udid: impl Into<String>) -> Self {
        Self(udid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn censored(&self) -> String {
        censor_udid(&self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.censored())
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.censored())
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// ── Bridge kind ────────────────────────────────────────────────

/// Low-level device communication backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum BridgeKind {
    /// The `go-ios` command-line tool.
    #[serde(rename = "go-ios")]
    GoIos,
    /// The `iosif` command-line tool.
    #[default]
    #[serde(rename = "iosif")]
    IosIf,
}

impl BridgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeKind::GoIos => "go-ios",
            BridgeKind::IosIf => "iosif",
        }
    }
}

impl fmt::Display for BridgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BridgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "go-ios" | "goios" => Ok(BridgeKind::GoIos),
            "iosif" | "ios_if" | "iif" => Ok(BridgeKind::IosIf),
            other => Err(format!("unknown bridge '{other}' (expected go-ios or iosif)")),
        }
    }
}

// ── Driver start method ────────────────────────────────────────

/// How the automation driver is brought up on a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WdaMethod {
    /// Spawn the driver through the bridge, then forward its port.
    #[default]
    Standard,
    /// The driver is launched out of process; only forward and connect.
    Manual,
}

impl fmt::Display for WdaMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WdaMethod::Standard => f.write_str("standard"),
            WdaMethod::Manual => f.write_str("manual"),
        }
    }
}

impl FromStr for WdaMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" | "" => Ok(WdaMethod::Standard),
            "manual" => Ok(WdaMethod::Manual),
            other => Err(format!("unknown wda method '{other}' (expected standard or manual)")),
        }
    }
}
