#[cfg(test)]
mod tests {
    use cfa_config::AgentConfig;
    use cfa_core::{AgentError, DeviceId};
    use cfa_device::mock::{MockBridge, MockDriver, MockProcessTable};
    use cfa_device::sanity::SanityCheck;
    use cfa_device::{DeviceTracker, DriverClient, ProcessSupervisor, WdaState};
    use cfa_runtime::runner;
    use cfa_runtime::{AgentContext, DeviceRegistration, RegistrationClient};
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MARKER: &str = "cfagent-test";
    const D1: &str = "AAAA1111";
    const D2: &str = "BBBB2222";

    struct Harness {
        ctx: AgentContext,
        table: Arc<MockProcessTable>,
        bridge: Arc<MockBridge>,
    }

    fn config() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.wda.start_timeout_secs = 1;
        config.wda.session_timeout_secs = 1;
        config.wda.poll_interval_ms = 10;
        config.process.marker = MARKER.into();
        config.process.heartbeat_interval_ms = 10;
        config
    }

    fn harness_with(config: AgentConfig, ids: &[&str], driver: MockDriver) -> Harness {
        let config = Arc::new(config);
        let table = MockProcessTable::new();
        let bridge = Arc::new(MockBridge::new(table.clone()).with_devices(ids));
        let supervisor = ProcessSupervisor::new(MARKER, table.clone());
        let driver: Arc<dyn DriverClient> = Arc::new(driver);
        let tracker = DeviceTracker::new(Arc::clone(&config), bridge.clone(), supervisor)
            .with_driver_factory(Arc::new(move |_: u16| driver.clone()));
        Harness {
            ctx: AgentContext::with_tracker(config, tracker),
            table,
            bridge,
        }
    }

    fn harness(ids: &[&str]) -> Harness {
        harness_with(config(), ids, MockDriver::new())
    }

    /// Trigger shutdown after `ms`, as a signal would.
    fn trigger_after(ctx: &AgentContext, ms: u64) {
        let shutdown = Arc::clone(&ctx.shutdown);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            shutdown.trigger().await;
        });
    }

    struct Fails(&'static str);

    #[async_trait::async_trait]
    impl SanityCheck for Fails {
        fn name(&self) -> String {
            self.0.into()
        }

        async fn check(&self, _config: &AgentConfig) -> Result<(), String> {
            Err("missing".into())
        }
    }

    // ── Shutdown coordinator ───────────────────────────────────

    #[tokio::test]
    async fn test_trigger_runs_once_and_cancels() {
        let h = harness(&[D1]);
        let token = h.ctx.token();
        assert!(!token.is_cancelled());

        tokio::join!(h.ctx.shutdown.trigger(), h.ctx.shutdown.trigger());
        h.ctx.shutdown.trigger().await;

        assert!(token.is_cancelled());
        assert!(h.ctx.shutdown.is_triggered());
        assert_eq!(h.bridge.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_listener_exits_when_token_cancelled() {
        let h = harness(&[D1]);
        let listener = h.ctx.shutdown.spawn_listener();
        h.ctx.shutdown.trigger().await;
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener should stop")
            .unwrap();
    }

    // ── run ────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_run_until_shutdown_leaves_nothing_behind() {
        let h = harness(&[D1, D2]);
        let leftover = h.table.spawn_marked(MARKER, "ios");
        let foreign = h.table.spawn_foreign("Xcode");

        trigger_after(&h.ctx, 150);
        let mut ticks = 0;
        let result = runner::run_agent(&h.ctx, &[], false, |_| ticks += 1).await;

        assert_eq!(result.unwrap(), ticks);
        assert!(!h.table.is_alive(leftover));
        assert!(h.table.is_alive(foreign));
        assert_eq!(h.table.count_marked(MARKER), 0);
        assert!(h.ctx.tracker.is_empty().await);
        assert_eq!(h.bridge.shutdown_count(), 1);
    }

    #[tokio::test]
    async fn test_run_failing_sanity_leaves_tracker_empty() {
        let h = harness(&[D1]);
        let checks: Vec<Box<dyn SanityCheck>> = vec![Box::new(Fails("tool:ios"))];

        let err = runner::run_agent(&h.ctx, &checks, false, |_| {}).await.unwrap_err();
        assert!(matches!(err, AgentError::SanityCheckFailed(ref f) if f == &vec!["tool:ios: missing".to_string()]));
        assert!(h.ctx.tracker.is_empty().await);
        assert!(h.bridge.events().iter().all(|e| !e.starts_with("spawn")));
        assert_eq!(h.table.count_marked(MARKER), 0);
    }

    #[tokio::test]
    async fn test_run_nosanity_skips_checks() {
        let h = harness(&[D1]);
        let checks: Vec<Box<dyn SanityCheck>> = vec![Box::new(Fails("always"))];
        trigger_after(&h.ctx, 80);
        assert!(runner::run_agent(&h.ctx, &checks, true, |_| {}).await.is_ok());
        assert_eq!(h.table.count_marked(MARKER), 0);
    }

    #[tokio::test]
    async fn test_run_without_devices() {
        let h = harness(&[]);
        let err = runner::run_agent(&h.ctx, &[], true, |_| {}).await.unwrap_err();
        assert!(matches!(err, AgentError::NoDevices));
        assert!(h.ctx.shutdown.is_triggered());
    }

    // ── Single-device commands ─────────────────────────────────

    #[tokio::test]
    async fn test_single_command_on_default_device() {
        let h = harness_with(config(), &[D2, D1], MockDriver::new().with_source("<Root/>"));
        let mut selected = None;

        let source = runner::run_single(
            &h.ctx,
            None,
            |id| selected = Some(id.clone()),
            |wda| async move { wda.source().await },
        )
        .await
        .unwrap();

        assert_eq!(source, "<Root/>");
        assert_eq!(selected, Some(DeviceId::new(D1)));
        assert_eq!(h.table.count_marked(MARKER), 0);
        assert!(h.ctx.tracker.is_empty().await);
    }

    #[tokio::test]
    async fn test_single_command_start_failure_cleans_up() {
        let h = harness_with(config(), &[D1], MockDriver::unready());

        let err = runner::run_single(&h.ctx, None, |_| {}, |wda| async move { wda.source().await })
            .await
            .unwrap_err();

        assert!(matches!(err, AgentError::StartFailure { code: 1, .. }));
        assert_eq!(h.table.count_marked(MARKER), 0);
        assert!(h.ctx.tracker.is_empty().await);
    }

    #[tokio::test]
    async fn test_click_missing_element_still_stops_session() {
        let h = harness(&[D1]);
        let wda_state = Arc::new(std::sync::Mutex::new(None));
        let seen = Arc::clone(&wda_state);

        let err = runner::run_single(&h.ctx, Some(&DeviceId::new(D1)), |_| {}, |wda| async move {
            *seen.lock().unwrap() = Some(wda.state());
            let el = wda.element_by_label("Trust").await?;
            wda.click(&el).await
        })
        .await
        .unwrap_err();

        assert!(matches!(err, AgentError::ElementNotFound(_)));
        assert_eq!(*wda_state.lock().unwrap(), Some(WdaState::Running));
        assert_eq!(h.table.count_marked(MARKER), 0);
    }

    #[tokio::test]
    async fn test_shutdown_mid_command_interrupts_and_cleans_up() {
        let h = harness(&[D1]);
        trigger_after(&h.ctx, 100);

        let result = tokio::time::timeout(
            Duration::from_secs(2),
            runner::run_single(&h.ctx, None, |_| {}, |_wda| async move {
                std::future::pending::<cfa_core::Result<()>>().await
            }),
        )
        .await
        .expect("shutdown should end the command");

        assert!(matches!(result, Err(AgentError::Interrupted)));
        assert!(h.ctx.shutdown.is_triggered());
        assert_eq!(h.table.count_marked(MARKER), 0);
        assert!(h.ctx.tracker.is_empty().await);
        assert!(h.bridge.events().contains(&format!("release {D1}")));
    }

    #[tokio::test]
    async fn test_shutdown_during_wda_start_cleans_up() {
        let h = harness_with(config(), &[D1], MockDriver::unready());
        trigger_after(&h.ctx, 50);

        let result = tokio::time::timeout(
            Duration::from_secs(3),
            runner::run_single(&h.ctx, None, |_| {}, |wda| async move { wda.source().await }),
        )
        .await
        .expect("shutdown should end the command");

        assert!(result.is_err());
        assert_eq!(h.bridge.shutdown_count(), 1);
        assert_eq!(h.table.count_marked(MARKER), 0);
    }

    #[tokio::test]
    async fn test_single_command_unknown_device() {
        let h = harness(&[D1]);
        let err = runner::run_single(
            &h.ctx,
            Some(&DeviceId::new("CCCC3333")),
            |_| {},
            |wda| async move { wda.source().await },
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AgentError::DeviceNotFound(_)));
    }

    // ── wda / vidtest ──────────────────────────────────────────

    #[tokio::test]
    async fn test_wda_detached_runs_until_shutdown() {
        let h = harness(&[D1]);
        trigger_after(&h.ctx, 150);
        runner::run_wda(&h.ctx, None, |_| {}, |_| {}).await.unwrap();
        assert_eq!(h.table.count_marked(MARKER), 0);
        assert!(h.bridge.events().iter().any(|e| e == &format!("spawn {D1} wda")));
    }

    #[tokio::test]
    async fn test_vidtest_streams_until_shutdown() {
        let h = harness(&[D1]);
        trigger_after(&h.ctx, 100);
        runner::run_vidtest(&h.ctx, None, |_| {}, |_| {}).await.unwrap();
        assert!(h.bridge.events().iter().any(|e| e == &format!("spawn {D1} backup-video")));
        assert_eq!(h.table.count_marked(MARKER), 0);
    }

    // ── cleanup ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_cleanup_command() {
        let h = harness(&[]);
        h.table.spawn_marked(MARKER, "iosif");
        h.table.spawn_marked(MARKER, "iosif");
        let report = runner::cleanup(&h.ctx).await;
        assert_eq!(report.killed.len(), 2);
        assert!(report.is_clean());
    }

    // ── Registration ───────────────────────────────────────────

    fn floor_config(url: &str) -> AgentConfig {
        let mut config = config();
        config.control_floor.url = Some(url.to_string());
        config.control_floor.username = Some("user".into());
        config.control_floor.password = Some("pass".into());
        config.control_floor.provider_name = "lab-mac-1".into();
        config
    }

    #[test]
    fn test_registration_requires_url() {
        let config = AgentConfig::default();
        assert!(matches!(
            RegistrationClient::from_config(&config.control_floor),
            Err(AgentError::ConfigInvalid(_))
        ));
    }

    #[test]
    fn test_registration_endpoint() {
        let config = floor_config("https://floor.example.com/");
        let client = RegistrationClient::from_config(&config.control_floor).unwrap();
        assert_eq!(client.endpoint(), "https://floor.example.com/provider/register");
    }

    #[tokio::test]
    async fn test_register_posts_censored_devices() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/provider/register"))
            .and(header("authorization", "Basic dXNlcjpwYXNz"))
            .and(body_json(json!({
                "udid": "***1111",
                "wdaPort": 8100,
                "bridge": "iosif",
                "name": "lab-mac-1"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let h = harness_with(floor_config(&server.uri()), &[D1], MockDriver::new());
        let client = RegistrationClient::from_config(&h.ctx.config.control_floor).unwrap();
        assert_eq!(runner::register_devices(&h.ctx, &client).await.unwrap(), 1);
        assert!(h.ctx.tracker.is_empty().await);
    }

    #[tokio::test]
    async fn test_register_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/provider/register"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
            .mount(&server)
            .await;

        let config = floor_config(&server.uri());
        let client = RegistrationClient::from_config(&config.control_floor).unwrap();
        let registration = DeviceRegistration {
            udid: "***1111".into(),
            wda_port: 8100,
            bridge: cfa_core::BridgeKind::GoIos,
            name: "lab-mac-1".into(),
        };
        let err = client.register(&registration).await.unwrap_err();
        assert!(matches!(err, AgentError::Registration(ref m) if m.contains("bad credentials")));
    }
}
