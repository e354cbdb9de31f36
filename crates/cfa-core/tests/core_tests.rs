#[cfg(test)]
mod tests {
    use cfa_core::*;

    // ── Censoring ──────────────────────────────────────────────

    #[test]
    fn test_censor_keeps_last_four() {
        assert_eq!(censor_udid("AABBCCDD1234"), "***1234");
    }

    #[test]
    fn test_censor_exactly_four() {
        assert_eq!(censor_udid("abcd"), "***abcd");
    }

    #[test]
    fn test_censor_any_input_shape() {
        let inputs = [
            "00008030-001A2D3C0E42802E",
            "f0e1d2c3b4a5968778695a4b3c2d1e0f12345678",
            "----",
            "a b c d e",
        ];
        for input in inputs {
            let censored = censor_udid(input);
            let tail = &input[input.len() - 4..];
            assert_eq!(censored, format!("***{tail}"));
            assert_eq!(censored.len(), 7);
        }
    }

    #[test]
    fn test_censor_short_identifier() {
        assert_eq!(censor_udid("ab"), "***ab");
        assert_eq!(censor_udid(""), "***");
    }

    #[test]
    fn test_device_id_display_is_censored() {
        let id = DeviceId::new("AABBCCDD1234");
        assert_eq!(id.to_string(), "***1234");
        assert_eq!(format!("{id:?}"), "DeviceId(***1234)");
        assert_eq!(id.as_str(), "AABBCCDD1234");
    }

    #[test]
    fn test_device_id_serializes_raw() {
        let id = DeviceId::new("AABBCCDD1234");
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"AABBCCDD1234\"");
    }

    // ── Enums ──────────────────────────────────────────────────

    #[test]
    fn test_bridge_kind_parse() {
        assert_eq!("go-ios".parse::<BridgeKind>().unwrap(), BridgeKind::GoIos);
        assert_eq!("iosif".parse::<BridgeKind>().unwrap(), BridgeKind::IosIf);
        assert!("adb".parse::<BridgeKind>().is_err());
    }

    #[test]
    fn test_bridge_kind_serde_names() {
        let json = serde_json::to_string(&BridgeKind::GoIos).unwrap();
        assert_eq!(json, "\"go-ios\"");
        let kind: BridgeKind = serde_json::from_str("\"iosif\"").unwrap();
        assert_eq!(kind, BridgeKind::IosIf);
    }

    #[test]
    fn test_wda_method_parse() {
        assert_eq!("manual".parse::<WdaMethod>().unwrap(), WdaMethod::Manual);
        assert_eq!("standard".parse::<WdaMethod>().unwrap(), WdaMethod::Standard);
        assert!("nng".parse::<WdaMethod>().is_err());
    }

    // ── Error tests ────────────────────────────────────────────

    #[test]
    fn test_start_failure_display() {
        let err = AgentError::StartFailure {
            udid: DeviceId::new("AABBCCDD1234"),
            code: 1,
            reason: "driver never became ready".into(),
        };
        let s = err.to_string();
        assert!(s.contains("***1234"));
        assert!(s.contains("code 1"));
        assert!(!s.contains("AABBCCDD"));
    }

    #[test]
    fn test_sanity_failure_lists_checks() {
        let err = AgentError::SanityCheckFailed(vec!["tool:ios".into(), "port:8100".into()]);
        assert_eq!(err.to_string(), "sanity checks failed: tool:ios; port:8100");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(AgentError::ElementNotFound("OK".into()).is_retryable());
        assert!(AgentError::StaleHandle("el-1".into()).is_retryable());
        assert!(
            AgentError::SessionNotReady {
                udid: DeviceId::new("1234"),
                waited_secs: 30
            }
            .is_retryable()
        );
        assert!(!AgentError::NoDevices.is_retryable());
        assert!(!AgentError::SanityCheckFailed(vec![]).is_retryable());
        assert!(!AgentError::Interrupted.is_retryable());
    }
}
