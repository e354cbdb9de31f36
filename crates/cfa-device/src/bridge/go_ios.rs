//! Bridge over the `go-ios` command-line tool.
//!
//! - `ios list` prints `{"deviceList":["<udid>", ...]}`
//! - `ios forward --udid=<udid> <local> <remote>` keeps a forward open until killed
//! - `ios runwda ...` launches the WebDriverAgent xctest runner
//! - `ios screenshot --stream --port=<port>` serves an MJPEG backup stream

use async_trait::async_trait;
use cfa_config::AgentConfig;
use cfa_core::{AgentError, BridgeKind, DeviceId, Result};
use serde::Deserialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::{Bridge, HelperKind, PortForward, Transport, TransportCore, normalize, run_tool};
use crate::process::{ProcessHandle, ProcessSupervisor};

#[derive(Debug, Deserialize)]
struct DeviceList {
    #[serde(rename = "deviceList", default)]
    device_list: Vec<String>,
}

/// Parse `ios list` output. go-ios may log lines before the JSON document.
pub(crate) fn parse_device_list(output: &str) -> Result<Vec<DeviceId>> {
    let json = output
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with('{'))
        .ok_or_else(|| AgentError::transport(BridgeKind::GoIos, "no device list in output"))?;
    let list: DeviceList = serde_json::from_str(json)
        .map_err(|e| AgentError::transport(BridgeKind::GoIos, format!("bad device list: {e}")))?;
    Ok(list
        .device_list
        .into_iter()
        .map(|udid| udid.trim().to_string())
        .filter(|udid| !udid.is_empty())
        .map(DeviceId::new)
        .collect())
}

// ─── Bridge ─────────────────────────────────────────────────────

pub struct GoIosBridge {
    config: Arc<AgentConfig>,
    closed: AtomicBool,
}

impl GoIosBridge {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self {
            config,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Bridge for GoIosBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::GoIos
    }

    async fn discover(&self) -> Result<Vec<DeviceId>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::transport(self.kind(), "bridge is shut down"));
        }
        let timeout = Duration::from_secs(self.config.tools.command_timeout_secs);
        let output = run_tool(self.kind(), &self.config.tools.go_ios_path, &["list"], timeout).await?;
        let ids = normalize(parse_device_list(&output)?);
        debug!(count = ids.len(), "go-ios discovery");
        Ok(ids)
    }

    fn create_transport(&self, id: &DeviceId) -> Box<dyn Transport> {
        Box::new(GoIosTransport {
            core: TransportCore::new(id.clone(), BridgeKind::GoIos, self.config.tools.go_ios_path.clone()),
            config: Arc::clone(&self.config),
        })
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("go-ios bridge shut down");
        }
    }
}

// ─── Transport ──────────────────────────────────────────────────

pub struct GoIosTransport {
    core: TransportCore,
    config: Arc<AgentConfig>,
}

impl GoIosTransport {
    fn helper_args(&self, helper: HelperKind) -> Vec<String> {
        let udid = format!("--udid={}", self.core.udid.as_str());
        match helper {
            HelperKind::Driver => vec![
                "runwda".into(),
                udid,
                format!("--bundleid={}", self.config.wda.bundle_id),
                format!("--testrunnerbundleid={}", self.config.wda.test_runner_bundle_id),
                format!("--xctestconfig={}", self.config.wda.xctest_config),
            ],
            HelperKind::BackupVideo { port } => vec![
                "screenshot".into(),
                "--stream".into(),
                format!("--port={port}"),
                udid,
            ],
        }
    }
}

#[async_trait]
impl Transport for GoIosTransport {
    fn udid(&self) -> &DeviceId {
        &self.core.udid
    }

    fn kind(&self) -> BridgeKind {
        BridgeKind::GoIos
    }

    fn attach_supervisor(&mut self, supervisor: Arc<ProcessSupervisor>) {
        self.core.attach(supervisor);
    }

    async fn forward_port(&self, local: u16, remote: u16) -> Result<PortForward> {
        let args = vec![
            "forward".to_string(),
            format!("--udid={}", self.core.udid.as_str()),
            local.to_string(),
            remote.to_string(),
        ];
        let process = self.core.spawn("forward", &args)?;
        debug!(udid = %self.core.udid, local, remote, "port forwarded");
        Ok(PortForward::new(local, remote, process))
    }

    async fn spawn_helper(&self, helper: HelperKind) -> Result<ProcessHandle> {
        self.core.spawn(helper.label(), &self.helper_args(helper))
    }

    async fn release(&self) -> usize {
        self.core.release().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_device_list() {
        let out = r#"{"deviceList":["BBBB2222","AAAA1111"]}"#;
        let ids = parse_device_list(out).unwrap();
        assert_eq!(ids, vec![DeviceId::new("BBBB2222"), DeviceId::new("AAAA1111")]);
    }

    #[test]
    fn test_parse_device_list_skips_log_lines() {
        let out = "time=\"...\" level=info msg=\"usbmuxd\"\n{\"deviceList\":[\"AAAA1111\"]}\n";
        let ids = parse_device_list(out).unwrap();
        assert_eq!(ids, vec![DeviceId::new("AAAA1111")]);
    }

    #[test]
    fn test_parse_empty_device_list() {
        let ids = parse_device_list(r#"{"deviceList":[]}"#).unwrap();
        assert!(ids.is_empty());
    }

    #[test]
    fn test_parse_garbage_is_transport_error() {
        assert!(matches!(
            parse_device_list("no devices"),
            Err(AgentError::Transport { .. })
        ));
    }

    #[test]
    fn test_driver_args_include_bundle() {
        let config = Arc::new(AgentConfig::default());
        let bridge = GoIosBridge::new(Arc::clone(&config));
        let transport = GoIosTransport {
            core: TransportCore::new(DeviceId::new("AAAA1111"), BridgeKind::GoIos, "ios".into()),
            config,
        };
        let args = transport.helper_args(HelperKind::Driver);
        assert_eq!(args[0], "runwda");
        assert!(args.contains(&"--udid=AAAA1111".to_string()));
        assert!(args.iter().any(|a| a.starts_with("--bundleid=")));
        assert_eq!(bridge.kind(), BridgeKind::GoIos);
    }

    #[tokio::test]
    async fn test_forward_without_supervisor_fails() {
        let bridge = GoIosBridge::new(Arc::new(AgentConfig::default()));
        let transport = bridge.create_transport(&DeviceId::new("AAAA1111"));
        let err = transport.forward_port(8100, 8100).await.unwrap_err();
        assert!(err.to_string().contains("no process supervisor"));
    }

    #[tokio::test]
    async fn test_discover_after_shutdown_fails() {
        let bridge = GoIosBridge::new(Arc::new(AgentConfig::default()));
        bridge.shutdown().await;
        assert!(bridge.discover().await.is_err());
    }
}
