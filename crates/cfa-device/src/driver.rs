//! WebDriverAgent HTTP client.
//!
//! [`DriverClient`] is the seam between the session state machine and the
//! driver's wire protocol. [`WdaClient`] speaks the W3C/WDA JSON protocol
//! over a forwarded local port.

use async_trait::async_trait;
use cfa_core::{AgentError, Result};
use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::time::Duration;

/// W3C element reference key.
const W3C_ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

// ─── Types ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

/// Alert state of the foreground app.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertInfo {
    pub present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub buttons: Vec<String>,
}

impl AlertInfo {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Opaque handle to a UI element inside one session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

impl ElementHandle {
    pub fn id(&self) -> &str {
        &self.0
    }
}

// ─── Trait ──────────────────────────────────────────────────────

/// Wire-level access to a running driver.
#[async_trait]
pub trait DriverClient: Send + Sync {
    /// Whether the driver answers its status endpoint.
    async fn is_ready(&self) -> bool;

    /// Create a session and return its id.
    async fn create_session(&self) -> Result<String>;

    /// Whether `session_id` is still known to the driver.
    async fn session_alive(&self, session_id: &str) -> Result<bool>;

    async fn window_size(&self, session_id: &str) -> Result<WindowSize>;

    /// UI hierarchy of the foreground app as XML.
    async fn source(&self, session_id: &str) -> Result<String>;

    async fn alert_info(&self, session_id: &str) -> Result<AlertInfo>;

    /// First element whose accessibility label equals `label`.
    async fn find_by_label(&self, session_id: &str, label: &str) -> Result<Option<ElementHandle>>;

    /// Tap an element. Fails with `StaleHandle` once the element is gone.
    async fn click(&self, session_id: &str, element: &ElementHandle) -> Result<()>;
}

// ─── HTTP client ────────────────────────────────────────────────

/// [`DriverClient`] over HTTP.
pub struct WdaClient {
    client: Client,
    base_url: String,
}

impl WdaClient {
    pub fn new(host: &str, port: u16) -> Self {
        Self::with_base_url(format!("http://{host}:{port}"))
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn get_value(&self, path: &str) -> Result<Value> {
        let resp = self.client.get(self.url(path)).send().await?;
        into_value(resp).await
    }

    async fn post_value(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self.client.post(self.url(path)).json(&body).send().await?;
        into_value(resp).await
    }
}

/// Unwrap the `value` member of a driver response, mapping driver errors.
async fn into_value(resp: Response) -> Result<Value> {
    let status = resp.status();
    let body: Value = resp.json().await.unwrap_or(Value::Null);
    let value = body.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        return Ok(value);
    }

    let error = value["error"].as_str().unwrap_or_default();
    let message = value["message"].as_str().unwrap_or(error).to_string();
    Err(match error {
        "stale element reference" | "no such element" => AgentError::StaleHandle(message),
        _ if status == StatusCode::NOT_FOUND && error.is_empty() => {
            AgentError::Driver(format!("not found: {message}"))
        }
        _ => AgentError::Driver(format!("{status}: {message}")),
    })
}

fn predicate_literal(label: &str) -> String {
    label.replace('\\', "\\\\").replace('\'', "\\'")
}

fn element_id(value: &Value) -> Option<String> {
    value
        .get(W3C_ELEMENT_KEY)
        .or_else(|| value.get("ELEMENT"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl DriverClient for WdaClient {
    async fn is_ready(&self) -> bool {
        match self.client.get(self.url("/status")).send().await {
            Ok(resp) if resp.status().is_success() => {
                let body: Value = resp.json().await.unwrap_or(Value::Null);
                body["value"]["ready"].as_bool().unwrap_or(true)
            }
            _ => false,
        }
    }

    async fn create_session(&self) -> Result<String> {
        let resp = self
            .client
            .post(self.url("/session"))
            .json(&json!({ "capabilities": {} }))
            .send()
            .await?;
        let status = resp.status();
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(AgentError::Driver(format!("create session: {status}")));
        }
        body["value"]["sessionId"]
            .as_str()
            .or_else(|| body["sessionId"].as_str())
            .map(str::to_string)
            .ok_or_else(|| AgentError::Driver("create session: no session id".into()))
    }

    async fn session_alive(&self, session_id: &str) -> Result<bool> {
        let resp = self
            .client
            .get(self.url(&format!("/session/{session_id}")))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    async fn window_size(&self, session_id: &str) -> Result<WindowSize> {
        let value = self
            .get_value(&format!("/session/{session_id}/window/size"))
            .await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn source(&self, session_id: &str) -> Result<String> {
        let value = self.get_value(&format!("/session/{session_id}/source")).await?;
        value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| AgentError::Driver("source: not a string".into()))
    }

    async fn alert_info(&self, session_id: &str) -> Result<AlertInfo> {
        let resp = self
            .client
            .get(self.url(&format!("/session/{session_id}/alert/text")))
            .send()
            .await?;
        if !resp.status().is_success() {
            return Ok(AlertInfo::none());
        }
        let body: Value = resp.json().await.unwrap_or(Value::Null);
        let Some(text) = body["value"].as_str().map(str::to_string) else {
            return Ok(AlertInfo::none());
        };

        let buttons = self
            .get_value(&format!("/session/{session_id}/wda/alert/buttons"))
            .await
            .ok()
            .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
            .unwrap_or_default();

        Ok(AlertInfo {
            present: true,
            text: Some(text),
            buttons,
        })
    }

    async fn find_by_label(&self, session_id: &str, label: &str) -> Result<Option<ElementHandle>> {
        let body = json!({
            "using": "predicate string",
            "value": format!("label == '{}'", predicate_literal(label)),
        });
        let value = self
            .post_value(&format!("/session/{session_id}/elements"), body)
            .await?;
        Ok(value
            .as_array()
            .and_then(|elements| elements.iter().find_map(element_id))
            .map(ElementHandle))
    }

    async fn click(&self, session_id: &str, element: &ElementHandle) -> Result<()> {
        let path = format!("/session/{session_id}/element/{}/click", element.id());
        match self.post_value(&path, json!({})).await {
            Ok(_) => Ok(()),
            Err(AgentError::Driver(msg)) if msg.starts_with("not found") => {
                Err(AgentError::StaleHandle(element.id().to_string()))
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_predicate_literal_escapes_quotes() {
        assert_eq!(predicate_literal("Don't Allow"), "Don\\'t Allow");
    }

    #[test]
    fn test_element_id_accepts_both_keys() {
        assert_eq!(element_id(&json!({ "ELEMENT": "a" })).as_deref(), Some("a"));
        assert_eq!(element_id(&json!({ W3C_ELEMENT_KEY: "b" })).as_deref(), Some("b"));
        assert_eq!(element_id(&json!({})), None);
    }

    #[test]
    fn test_alert_json_omits_absent_text() {
        assert_eq!(AlertInfo::none().to_json().unwrap(), r#"{"present":false}"#);
    }

    #[test]
    fn test_base_url_trims_slash() {
        let client = WdaClient::with_base_url("http://127.0.0.1:8100/");
        assert_eq!(client.base_url(), "http://127.0.0.1:8100");
        assert_eq!(WdaClient::new("127.0.0.1", 8101).base_url(), "http://127.0.0.1:8101");
    }
}
