//! End-to-end scenarios against the mock peer over loopback sockets

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::net::SocketAddr;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    use facebridge_client::wire;
    use facebridge_client::{ClientConfig, ConnectionState, DiscoveryMode, FaultReason, ProtocolClient};
    use facebridge_core::{HealthSource, TrackingFrame, Vec3};
    use facebridge_rules::{RuleRepository, TransformationEngine};
    use facebridge_runtime::{Bridge, BridgeHandle};
    use proptest::prelude::*;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    use crate::{
        fast_config, frame_sequence, write_rules, MockPeer, MockPeerConfig, SAMPLE_RULES,
        SAMPLE_RULE_NAMES,
    };

    const WAIT: Duration = Duration::from_secs(10);

    async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        tokio::time::timeout(WAIT, async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Like `wait_until`, feeding a frame between checks
    async fn feed_until(
        tx: &mpsc::Sender<TrackingFrame>,
        mut condition: impl FnMut() -> bool,
    ) -> bool {
        let frames = frame_sequence(11, 64);
        tokio::time::timeout(WAIT, async {
            let mut i = 0usize;
            while !condition() {
                let _ = tx.send(frames[i % frames.len()].clone()).await;
                i += 1;
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .is_ok()
    }

    async fn start_bridge(peer: &MockPeer, dir: &Path) -> (BridgeHandle, mpsc::Sender<TrackingFrame>) {
        let config = fast_config(peer.port(), dir);
        let (tx, rx) = mpsc::channel(config.frame_buffer);
        let handle = Bridge::new(config).start(rx).unwrap();
        (handle, tx)
    }

    async fn with_timeout<T>(fut: impl Future<Output = T>) -> T {
        tokio::time::timeout(WAIT, fut).await.unwrap()
    }

    // ------------------------------------------------------------------------
    // Session establishment
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_first_run_requests_token_second_run_reuses_it() {
        let peer = MockPeer::start(MockPeerConfig::default()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_rules(dir.path(), SAMPLE_RULES);

        let (handle, _tx) = start_bridge(&peer, dir.path()).await;
        let monitor = handle.client_monitor().clone();
        assert!(wait_until(|| monitor.state() == ConnectionState::Ready).await);
        handle.shutdown().await;

        assert_eq!(peer.tokens_issued(), 1);
        let stored = std::fs::read_to_string(dir.path().join("token.txt")).unwrap();
        assert_eq!(stored.trim(), "mock-token-1");

        let (handle, _tx) = start_bridge(&peer, dir.path()).await;
        let monitor = handle.client_monitor().clone();
        assert!(wait_until(|| monitor.state() == ConnectionState::Ready).await);
        handle.shutdown().await;

        assert_eq!(peer.tokens_issued(), 1);
        assert_eq!(peer.count(wire::TOKEN_REQUEST), 1);
        assert_eq!(peer.count(wire::AUTH_REQUEST), 2);
        assert_eq!(peer.connections(), 2);
        peer.stop().await;
    }

    #[tokio::test]
    async fn test_every_rule_declared_once_and_frames_delivered() {
        let peer = MockPeer::start(MockPeerConfig::default()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_rules(dir.path(), SAMPLE_RULES);

        let (handle, tx) = start_bridge(&peer, dir.path()).await;
        assert!(feed_until(&tx, || peer.count(wire::INJECT_REQUEST) >= 10).await);

        for name in SAMPLE_RULE_NAMES {
            assert_eq!(peer.creation_requests_for(name), 1, "{}", name);
        }
        for value in peer.injected_values("EyeOpenLeft") {
            assert!((0.0..=1.0).contains(&value));
        }
        assert!(!peer.injected_values("FaceAngleX").is_empty());
        assert_eq!(peer.violations(), 0);

        let stats = handle.shutdown().await;
        assert!(stats.frames_sent >= 10);
        assert_eq!(stats.abandoned_rules, 0);
        peer.stop().await;
    }

    #[tokio::test]
    async fn test_existing_parameter_counts_as_declared() {
        let peer = MockPeer::start(MockPeerConfig {
            existing_parameters: vec!["MouthOpen".to_string()],
            ..Default::default()
        })
        .await
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_rules(dir.path(), SAMPLE_RULES);

        let (handle, _tx) = start_bridge(&peer, dir.path()).await;
        let monitor = handle.client_monitor().clone();
        assert!(wait_until(|| monitor.state() == ConnectionState::Ready).await);
        assert_eq!(peer.creation_requests_for("MouthOpen"), 1);

        // Already declared this session: nothing goes out
        let declarations = handle.engine().repository().current().declarations();
        let created = with_timeout(async {
            handle
                .client()
                .lock()
                .await
                .synchronize_parameters(&declarations)
                .await
        })
        .await
        .unwrap();
        assert_eq!(created, 0);
        assert_eq!(peer.creation_requests_for("MouthOpen"), 1);
        assert_eq!(peer.connections(), 1);

        handle.shutdown().await;
        peer.stop().await;
    }

    #[tokio::test]
    async fn test_denied_token_faults_until_access_granted() {
        let peer = MockPeer::start(MockPeerConfig {
            deny_tokens: true,
            ..Default::default()
        })
        .await
        .unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_rules(dir.path(), SAMPLE_RULES);

        let (handle, _tx) = start_bridge(&peer, dir.path()).await;
        let monitor = handle.client_monitor().clone();
        assert!(wait_until(|| monitor.state() == ConnectionState::Faulted).await);

        let fault = with_timeout(async { handle.client().lock().await.last_fault().cloned() })
            .await
            .unwrap();
        assert_eq!(fault.reason, FaultReason::AuthenticationDenied);
        assert!(!monitor.health().is_healthy);
        assert!(!dir.path().join("token.txt").exists());

        peer.set_deny_tokens(false);
        assert!(wait_until(|| monitor.state() == ConnectionState::Ready).await);
        assert!(dir.path().join("token.txt").exists());

        handle.shutdown().await;
        peer.stop().await;
    }

    // ------------------------------------------------------------------------
    // Recovery
    // ------------------------------------------------------------------------

    #[tokio::test]
    async fn test_severed_session_recovers_on_new_connection() {
        let peer = MockPeer::start(MockPeerConfig::default()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        write_rules(dir.path(), SAMPLE_RULES);

        let (handle, tx) = start_bridge(&peer, dir.path()).await;
        assert!(feed_until(&tx, || peer.count(wire::INJECT_REQUEST) >= 3).await);

        peer.sever();

        let recovered = feed_until(&tx, || {
            peer.requests()
                .iter()
                .any(|r| r.connection >= 2 && r.envelope.message_type == wire::INJECT_REQUEST)
        })
        .await;
        assert!(recovered);

        // Reconnect reuses the stored token and never injects before auth
        assert_eq!(peer.tokens_issued(), 1);
        assert_eq!(peer.violations(), 0);
        assert!(handle.health().reinitializations["client"] >= 2);

        let stats = handle.shutdown().await;
        assert!(stats.failures >= 1 || stats.dropped_not_ready + stats.dropped_busy >= 1);
        peer.stop().await;
    }

    #[tokio::test]
    async fn test_rule_reload_declares_new_parameter() {
        let peer = MockPeer::start(MockPeerConfig::default()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = write_rules(
            dir.path(),
            r#"[{"name": "MouthOpen", "func": "JawOpen", "min": 0, "max": 1, "defaultValue": 0}]"#,
        );

        let (handle, tx) = start_bridge(&peer, dir.path()).await;
        assert!(feed_until(&tx, || peer.count(wire::INJECT_REQUEST) >= 2).await);
        assert_eq!(peer.count(wire::PARAMETER_CREATION_REQUEST), 1);

        write_rules(
            dir.path(),
            r#"[
                {"name": "MouthOpen", "func": "JawOpen", "min": 0, "max": 1, "defaultValue": 0},
                {"name": "Tongue", "func": "TongueOut * 2", "min": 0, "max": 1, "defaultValue": 0}
            ]"#,
        );
        handle.engine().repository().reload(&path);

        assert!(feed_until(&tx, || !peer.injected_values("Tongue").is_empty()).await);
        assert_eq!(peer.creation_requests_for("Tongue"), 1);
        assert_eq!(peer.creation_requests_for("MouthOpen"), 1);

        handle.shutdown().await;
        peer.stop().await;
    }

    #[tokio::test]
    async fn test_refused_connection_faults_then_recovers() {
        let peer = MockPeer::start(MockPeerConfig::default()).await.unwrap();
        peer.set_refuse(true);
        let dir = tempfile::tempdir().unwrap();

        let config = ClientConfig {
            endpoint: Some(peer.url()),
            token_path: dir.path().join("token.txt"),
            backoff: facebridge_client::BackoffPolicy::fixed(Duration::from_millis(10)),
            request_timeout: Duration::from_secs(2),
            ..ClientConfig::default()
        };
        let mut client = ProtocolClient::new(config, CancellationToken::new());

        assert!(with_timeout(client.reinitialize(&[])).await.is_err());
        assert_eq!(client.state(), ConnectionState::Faulted);
        assert_eq!(
            client.last_fault().map(|f| f.reason),
            Some(FaultReason::ConnectFailed)
        );
        assert_eq!(peer.connections(), 0);

        peer.set_refuse(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        with_timeout(client.reinitialize(&[])).await.unwrap();
        assert!(client.is_ready());
        assert_eq!(peer.connections(), 1);

        client.shutdown().await;
        peer.stop().await;
    }

    // ------------------------------------------------------------------------
    // Discovery
    // ------------------------------------------------------------------------

    fn free_udp_addr() -> SocketAddr {
        let socket = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.local_addr().unwrap()
    }

    #[tokio::test]
    async fn test_required_discovery_finds_announced_peer() {
        let peer = MockPeer::start(MockPeerConfig::default()).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let listen = free_udp_addr();

        let config = ClientConfig {
            endpoint: None,
            discovery: DiscoveryMode::Required,
            discovery_addr: listen,
            discovery_timeout: Duration::from_secs(3),
            token_path: dir.path().join("token.txt"),
            ..ClientConfig::default()
        };
        let cancel = CancellationToken::new();
        let mut client = ProtocolClient::new(config, cancel.clone());

        let announcing = CancellationToken::new();
        let broadcaster = peer.announce(listen, Duration::from_millis(25), announcing.clone());

        let repo = RuleRepository::new();
        let rules = repo.load_str(SAMPLE_RULES);
        with_timeout(client.reinitialize(&rules.declarations()))
            .await
            .unwrap();
        assert_eq!(client.state(), ConnectionState::Ready);
        assert_eq!(peer.connections(), 1);

        announcing.cancel();
        broadcaster.await.unwrap();
        client.shutdown().await;
        peer.stop().await;
    }

    #[tokio::test]
    async fn test_required_discovery_without_announcement_faults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            endpoint: None,
            discovery: DiscoveryMode::Required,
            discovery_addr: free_udp_addr(),
            discovery_timeout: Duration::from_millis(100),
            token_path: dir.path().join("token.txt"),
            ..ClientConfig::default()
        };
        let mut client = ProtocolClient::new(config, CancellationToken::new());

        let result = with_timeout(client.reinitialize(&[])).await;
        assert!(result.is_err());
        assert_eq!(client.state(), ConnectionState::Faulted);
        assert_eq!(
            client.last_fault().map(|f| f.reason),
            Some(FaultReason::DiscoveryTimeout)
        );
    }

    // ------------------------------------------------------------------------
    // Sample rules
    // ------------------------------------------------------------------------

    fn sample_engine() -> TransformationEngine {
        let repo = Arc::new(RuleRepository::new());
        repo.load_str(SAMPLE_RULES);
        TransformationEngine::new(repo)
    }

    proptest! {
        #[test]
        fn test_sample_rules_stay_in_bounds(
            rx in -90.0f64..90.0,
            ry in -90.0f64..90.0,
            rz in -90.0f64..90.0,
            blink in 0.0f64..1.0,
            jaw in 0.0f64..1.0,
            smile in 0.0f64..1.0,
        ) {
            let engine = sample_engine();
            let frame = TrackingFrame::new(0)
                .with_face_found(true)
                .with_head_rotation(Vec3::new(rx, ry, rz))
                .with_blend_shape("EyeBlinkLeft", blink)
                .with_blend_shape("EyeBlinkRight", 1.0 - blink)
                .with_blend_shape("JawOpen", jaw)
                .with_blend_shape("MouthSmileLeft", smile);

            let rules = engine.repository().current();
            let result = engine.transform(&frame, &rules);
            prop_assert!(result.abandoned.is_empty());
            prop_assert_eq!(result.outputs.len(), SAMPLE_RULE_NAMES.len());
            for output in &result.outputs {
                let rule = rules.get(&output.id).unwrap();
                prop_assert!(output.value >= rule.min && output.value <= rule.max, "{:?}", output);
            }
        }
    }
}
