//! Control-floor registration.
//!
//! Each device is announced with its censored identifier, the local WDA
//! port and the bridge in use. Raw identifiers never leave the host.

use cfa_config::schema::ControlFloorConfig;
use cfa_core::{AgentError, BridgeKind, Result};
use cfa_device::DeviceSnapshot;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Body of one registration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceRegistration {
    pub udid: String,
    pub wda_port: u16,
    pub bridge: BridgeKind,
    pub name: String,
}

impl DeviceRegistration {
    pub fn from_snapshot(snapshot: &DeviceSnapshot, provider: &str) -> Self {
        Self {
            udid: snapshot.udid.clone(),
            wda_port: snapshot.wda_port,
            bridge: snapshot.bridge,
            name: provider.to_string(),
        }
    }
}

pub struct RegistrationClient {
    client: Client,
    endpoint: String,
    username: Option<String>,
    password: Option<String>,
    provider: String,
}

impl RegistrationClient {
    /// `ConfigInvalid` when no control-floor URL is configured.
    pub fn from_config(config: &ControlFloorConfig) -> Result<Self> {
        let url = config
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| AgentError::ConfigInvalid("controlFloor.url is not set".into()))?;
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Ok(Self {
            client,
            endpoint: format!("{}/provider/register", url.trim_end_matches('/')),
            username: config.username.clone(),
            password: config.password.clone(),
            provider: config.provider_name.clone(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub async fn register(&self, registration: &DeviceRegistration) -> Result<()> {
        let mut req = self.client.post(&self.endpoint).json(registration);
        if let Some(user) = &self.username {
            req = req.basic_auth(user, self.password.as_deref());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AgentError::Registration(format!("{}: {e}", self.endpoint)))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::Registration(format!(
                "{status}: {}",
                body.trim()
            )));
        }

        debug!(udid = %registration.udid, status = %status, "registration accepted");
        info!(udid = %registration.udid, port = registration.wda_port, "device registered with control floor");
        Ok(())
    }
}
