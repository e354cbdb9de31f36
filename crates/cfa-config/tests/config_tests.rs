#[cfg(test)]
mod tests {
    use cfa_config::schema::*;
    use cfa_config::{ConfigLoader, ConfigPaths, merge_json};
    use cfa_core::{AgentError, BridgeKind, WdaMethod};
    use serde_json::json;
    use std::path::Path;

    fn write(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn paths_in(dir: &Path) -> ConfigPaths {
        ConfigPaths {
            config: dir.join("config.json"),
            defaults: dir.join("default.json"),
            calculated: dir.join("calculated.json"),
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    // ── Default tests ──────────────────────────────────────────

    #[test]
    fn test_agent_config_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.bridge, BridgeKind::IosIf);
        assert_eq!(config.wda.method, WdaMethod::Standard);
        assert_eq!(config.wda.base_port, 8100);
        assert!(!config.sanity.skip);
        assert_eq!(config.process.marker, "cfagent");
        assert_eq!(config.process.heartbeat_interval_ms, 1000);
    }

    #[test]
    fn test_default_paths() {
        let paths = ConfigPaths::default();
        assert_eq!(paths.config, Path::new("config.json"));
        assert_eq!(paths.defaults, Path::new("default.json"));
        assert_eq!(paths.calculated, Path::new("calculated.json"));
    }

    #[test]
    fn test_paths_from_overrides() {
        let paths = ConfigPaths::from_overrides(Some(Path::new("/etc/cf/main.json")), None, None);
        assert_eq!(paths.config, Path::new("/etc/cf/main.json"));
        assert_eq!(paths.defaults, Path::new("default.json"));
    }

    #[test]
    fn test_default_config_validates() {
        let warnings = AgentConfig::default().validate().unwrap();
        assert!(
            warnings
                .iter()
                .all(|w| w.severity != WarningSeverity::Error)
        );
    }

    // ── Merge tests ────────────────────────────────────────────

    #[test]
    fn test_merge_nested_objects() {
        let mut base = json!({"wda": {"basePort": 8100, "method": "standard"}, "bridge": "iosif"});
        merge_json(&mut base, json!({"wda": {"method": "manual"}}));
        assert_eq!(base["wda"]["basePort"], 8100);
        assert_eq!(base["wda"]["method"], "manual");
        assert_eq!(base["bridge"], "iosif");
    }

    #[test]
    fn test_merge_replaces_arrays() {
        let mut base = json!({"sanity": {"requiredTools": ["a", "b"]}});
        merge_json(&mut base, json!({"sanity": {"requiredTools": ["c"]}}));
        assert_eq!(base["sanity"]["requiredTools"], json!(["c"]));
    }

    // ── Loader tests ───────────────────────────────────────────

    #[test]
    fn test_layer_precedence() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "default.json",
            r#"{"bridge": "iosif", "wda": {"basePort": 9000, "method": "standard"}}"#,
        );
        write(
            dir.path(),
            "config.json",
            r#"{"bridge": "go-ios", "wda": {"basePort": 9100}}"#,
        );
        write(dir.path(), "calculated.json", r#"{"wda": {"basePort": 9200}}"#);

        let loader = ConfigLoader::load_with_env(&paths_in(dir.path()), no_env).unwrap();
        let config = loader.get();
        assert_eq!(config.bridge, BridgeKind::GoIos);
        assert_eq!(config.wda.base_port, 9200);
        assert_eq!(config.wda.method, WdaMethod::Standard);
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load_with_env(&paths_in(dir.path()), no_env).unwrap();
        assert_eq!(loader.get().wda.base_port, 8100);
    }

    #[test]
    fn test_load_keeps_notices_for_later_logging() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::load_with_env(&paths_in(dir.path()), no_env).unwrap();
        let notices = loader.notices();
        assert!(notices[0].starts_with("config file not found, using defaults"));
        assert!(notices.iter().any(|n| n.contains("controlFloor.url")));

        write(
            dir.path(),
            "config.json",
            r#"{"controlFloor": {"url": "https://floor.example.com"}}"#,
        );
        let loader = ConfigLoader::load_with_env(&paths_in(dir.path()), no_env).unwrap();
        assert!(loader.notices().iter().all(|n| !n.contains("not found")));
        assert!(loader.notices().iter().all(|n| !n.contains("controlFloor.url")));
    }

    #[test]
    fn test_malformed_json_is_config_invalid() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.json", "{ not json");
        let result = ConfigLoader::load_with_env(&paths_in(dir.path()), no_env);
        assert!(matches!(result, Err(AgentError::ConfigInvalid(_))));
    }

    #[test]
    fn test_non_object_layer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "calculated.json", "[1, 2, 3]");
        let result = ConfigLoader::load_with_env(&paths_in(dir.path()), no_env);
        match result {
            Err(AgentError::ConfigInvalid(msg)) => assert!(msg.contains("JSON object")),
            _ => panic!("expected ConfigInvalid"),
        }
    }

    #[test]
    fn test_unknown_bridge_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.json", r#"{"bridge": "adb"}"#);
        let result = ConfigLoader::load_with_env(&paths_in(dir.path()), no_env);
        assert!(matches!(result, Err(AgentError::ConfigInvalid(_))));
    }

    #[test]
    fn test_validation_error_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.json", r#"{"process": {"marker": ""}}"#);
        let result = ConfigLoader::load_with_env(&paths_in(dir.path()), no_env);
        match result {
            Err(AgentError::ConfigInvalid(msg)) => assert!(msg.contains("process.marker")),
            _ => panic!("expected ConfigInvalid"),
        }
    }

    #[test]
    fn test_env_overrides() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "config.json", r#"{"bridge": "iosif"}"#);
        let env = |key: &str| match key {
            "CFAGENT_BRIDGE" => Some("go-ios".to_string()),
            "CFAGENT_WDA_METHOD" => Some("manual".to_string()),
            _ => None,
        };
        let config = ConfigLoader::load_with_env(&paths_in(dir.path()), env)
            .unwrap()
            .get();
        assert_eq!(config.bridge, BridgeKind::GoIos);
        assert_eq!(config.wda.method, WdaMethod::Manual);
    }

    #[test]
    fn test_bad_env_override_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = |key: &str| (key == "CFAGENT_WDA_METHOD").then(|| "nng".to_string());
        let result = ConfigLoader::load_with_env(&paths_in(dir.path()), env);
        assert!(matches!(result, Err(AgentError::ConfigInvalid(_))));
    }

    // ── Validation ─────────────────────────────────────────────

    #[test]
    fn test_video_port_collision() {
        let mut config = AgentConfig::default();
        config.video.enabled = true;
        config.video.base_port = config.wda.base_port;
        let err = config.validate().unwrap_err();
        assert!(err.contains("video.basePort"));
    }

    #[test]
    fn test_go_ios_standard_needs_bundle() {
        let mut config = AgentConfig::default();
        config.bridge = BridgeKind::GoIos;
        config.wda.bundle_id.clear();
        assert!(config.validate().is_err());

        config.wda.method = WdaMethod::Manual;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bridge_tool_follows_bridge() {
        let mut config = AgentConfig::default();
        config.tools.go_ios_path = "/opt/go-ios/ios".into();
        config.bridge = BridgeKind::GoIos;
        assert_eq!(config.bridge_tool(), "/opt/go-ios/ios");
        config.bridge = BridgeKind::IosIf;
        assert_eq!(config.bridge_tool(), "iosif");
    }
}
