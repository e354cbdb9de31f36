use thiserror::Error;

use crate::types::DeviceId;

/// Unified error type for the device agent.
#[derive(Error, Debug)]
pub enum AgentError {
    // ── Driver lifecycle ───────────────────────────────────────
    #[error("driver start failed on {udid} (code {code}): {reason}")]
    StartFailure {
        udid: DeviceId,
        code: i32,
        reason: String,
    },

    #[error("driver session not ready on {udid} after {waited_secs}s")]
    SessionNotReady { udid: DeviceId, waited_secs: u64 },

    #[error("driver already {state} on {udid}")]
    AlreadyStarted { udid: DeviceId, state: String },

    #[error("invalid driver state on {udid}: {reason}")]
    InvalidState { udid: DeviceId, reason: String },

    // ── Session operations ─────────────────────────────────────
    #[error("element not found: {0}")]
    ElementNotFound(String),

    #[error("element handle is stale: {0}")]
    StaleHandle(String),

    #[error("driver error: {0}")]
    Driver(String),

    // ── Devices & transport ────────────────────────────────────
    #[error("no devices attached")]
    NoDevices,

    #[error("device not found: {0}")]
    DeviceNotFound(DeviceId),

    #[error("transport error: {bridge}: {reason}")]
    Transport { bridge: String, reason: String },

    // ── Supervisor ─────────────────────────────────────────────
    #[error("sanity checks failed: {}", .0.join("; "))]
    SanityCheckFailed(Vec<String>),

    #[error("process cleanup incomplete: {failed} of {attempted} processes survived")]
    ProcessCleanupPartial { attempted: usize, failed: usize },

    #[error("interrupted by shutdown")]
    Interrupted,

    // ── Config errors ──────────────────────────────────────────
    #[error("config invalid: {0}")]
    ConfigInvalid(String),

    // ── Control plane ──────────────────────────────────────────
    #[error("registration failed: {0}")]
    Registration(String),

    // ── Generic wrappers ───────────────────────────────────────
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    /// Errors a caller can retry without restarting the invocation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AgentError::SessionNotReady { .. }
                | AgentError::ElementNotFound(_)
                | AgentError::StaleHandle(_)
        )
    }

    pub fn transport(bridge: impl std::fmt::Display, reason: impl Into<String>) -> Self {
        AgentError::Transport {
            bridge: bridge.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
