//! Bridge over the `iosif` command-line tool.
//!
//! `iosif list` prints one device per line (`<udid> [name...]`); forwards,
//! the driver and the video stream are each a long-running `iosif` process.

use async_trait::async_trait;
use cfa_config::AgentConfig;
use cfa_core::{AgentError, BridgeKind, DeviceId, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info};

use super::{Bridge, HelperKind, PortForward, Transport, TransportCore, normalize, run_tool};
use crate::process::{ProcessHandle, ProcessSupervisor};

pub(crate) fn parse_device_lines(output: &str) -> Vec<DeviceId> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .filter(|udid| !udid.starts_with('#'))
        .map(DeviceId::new)
        .collect()
}

pub struct IosIfBridge {
    config: Arc<AgentConfig>,
    closed: AtomicBool,
}

impl IosIfBridge {
    pub fn new(config: Arc<AgentConfig>) -> Self {
        Self {
            config,
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Bridge for IosIfBridge {
    fn kind(&self) -> BridgeKind {
        BridgeKind::IosIf
    }

    async fn discover(&self) -> Result<Vec<DeviceId>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(AgentError::transport(self.kind(), "bridge is shut down"));
        }
        let timeout = Duration::from_secs(self.config.tools.command_timeout_secs);
        let output = run_tool(self.kind(), &self.config.tools.iosif_path, &["list"], timeout).await?;
        let ids = normalize(parse_device_lines(&output));
        debug!(count = ids.len(), "iosif discovery");
        Ok(ids)
    }

    fn create_transport(&self, id: &DeviceId) -> Box<dyn Transport> {
        Box::new(IosIfTransport {
            core: TransportCore::new(id.clone(), BridgeKind::IosIf, self.config.tools.iosif_path.clone()),
        })
    }

    async fn shutdown(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            info!("iosif bridge shut down");
        }
    }
}

pub struct IosIfTransport {
    core: TransportCore,
}

impl IosIfTransport {
    fn helper_args(&self, helper: HelperKind) -> Vec<String> {
        let udid = self.core.udid.as_str().to_string();
        match helper {
            HelperKind::Driver => vec!["wda".into(), "-id".into(), udid],
            HelperKind::BackupVideo { port } => vec![
                "vidstream".into(),
                "-id".into(),
                udid,
                "-port".into(),
                port.to_string(),
            ],
        }
    }
}

#[async_trait]
impl Transport for IosIfTransport {
    fn udid(&self) -> &DeviceId {
        &self.core.udid
    }

    fn kind(&self) -> BridgeKind {
        BridgeKind::IosIf
    }

    fn attach_supervisor(&mut self, supervisor: Arc<ProcessSupervisor>) {
        self.core.attach(supervisor);
    }

    async fn forward_port(&self, local: u16, remote: u16) -> Result<PortForward> {
        let args = vec![
            "tunnel".to_string(),
            "-id".to_string(),
            self.core.udid.as_str().to_string(),
            format!("{local}:{remote}"),
        ];
        let process = self.core.spawn("tunnel", &args)?;
        debug!(udid = %self.core.udid, local, remote, "tunnel open");
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
    fn test_parse_device_lines() {
        let out = "BBBB2222 Bob's iPhone\n\nAAAA1111\n";
        let ids = parse_device_lines(out);
        assert_eq!(ids, vec![DeviceId::new("BBBB2222"), DeviceId::new("AAAA1111")]);
        assert_eq!(
            normalize(ids),
            vec![DeviceId::new("AAAA1111"), DeviceId::new("BBBB2222")]
        );
    }

    #[test]
    fn test_parse_skips_comments() {
        assert!(parse_device_lines("# no devices\n").is_empty());
    }

    #[test]
    fn test_video_args() {
        let transport = IosIfTransport {
            core: TransportCore::new(DeviceId::new("AAAA1111"), BridgeKind::IosIf, "iosif".into()),
        };
        let args = transport.helper_args(HelperKind::BackupVideo { port: 8200 });
        assert_eq!(args, vec!["vidstream", "-id", "AAAA1111", "-port", "8200"]);
    }

    #[test]
    fn test_factory_selects_variant() {
        let mut config = AgentConfig::default();
        config.bridge = BridgeKind::IosIf;
        let bridge = super::super::from_config(&Arc::new(config.clone()));
        assert_eq!(bridge.kind(), BridgeKind::IosIf);
        let transport = bridge.create_transport(&DeviceId::new("AAAA1111"));
        assert_eq!(transport.kind(), BridgeKind::IosIf);

        config.bridge = BridgeKind::GoIos;
        let bridge = super::super::from_config(&Arc::new(config));
        assert_eq!(bridge.kind(), BridgeKind::GoIos);
    }
}
