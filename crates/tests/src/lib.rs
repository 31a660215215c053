//! # Integration Tests
//!
//! End-to-end tests over real loopback sockets.
//!
//! Covers:
//! - Session files through the config manager into a coordinator
//! - HTTP delivery against a local axum receiver
//! - Routed fan-out to WebSocket, SSE and UDP clients at once

#[cfg(test)]
mod config_flow_tests {
    use std::io::Write;

    use config_loader::{ConfigManager, MapEnv, ENV_UDP_PORT, ENV_WS_PORT};
    use contracts::ContractError;
    use dispatcher::Coordinator;
    use serde_json::json;

    fn manager() -> ConfigManager {
        ConfigManager::with_env(&MapEnv::new([(ENV_WS_PORT, "9100"), (ENV_UDP_PORT, "5005")]))
    }

    /// Template + file + explicit overrides, then a coordinator from the result
    #[test]
    fn test_file_layers_into_coordinator() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
template = "realtime"
session_id = "lab-7"
enabled_distributors = ["websocket", "udp"]

[distributors.udp]
host = "127.0.0.1"

[event_routing]
"eye.*" = ["websocket", "udp"]
"#
        )
        .unwrap();

        let loaded = manager()
            .load_with_overrides(
                file.path(),
                None,
                &json!({"distributors": {"websocket": {"heartbeat_interval_ms": 5000}}}),
            )
            .unwrap();

        assert_eq!(loaded.template, "realtime");
        let session = loaded.session;
        assert_eq!(session.session_id, "lab-7");
        assert_eq!(session.distributors["websocket"]["port"], json!(9100));
        assert_eq!(session.distributors["websocket"]["heartbeat_interval_ms"], json!(5000));
        assert_eq!(session.distributors["udp"]["port"], json!(5005));

        let coordinator = Coordinator::from_session(&session).unwrap();
        assert_eq!(coordinator.protocols(), vec!["udp", "websocket"]);
        assert_eq!(coordinator.resolve("eye.gaze"), vec!["websocket", "udp"]);
        // "face.*" also names sse, which the allow-list leaves out
        assert_eq!(coordinator.resolve("face.detected"), vec!["websocket"]);
    }

    #[test]
    fn test_invalid_file_lists_every_issue() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"distributors": {{"websocket": {{"port": 0}}, "udp": {{"multicast_ttl": 0}}}}}}"#
        )
        .unwrap();

        let err = manager().load_from_path(file.path(), None).unwrap_err();
        let ContractError::ConfigInvalid { issues } = err else {
            panic!("expected ConfigInvalid, got {err:?}");
        };
        let fields: Vec<&str> = issues.iter().map(|i| i.field.as_str()).collect();
        assert!(fields.contains(&"distributors.websocket.port"), "{fields:?}");
        assert!(fields.contains(&"distributors.udp.multicast_ttl"), "{fields:?}");
    }
}

#[cfg(test)]
mod http_e2e_tests {
    use std::net::SocketAddr;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use axum::{extract::State, routing::get, routing::post, Json, Router};
    use contracts::{ErrorCode, Payload, TargetConfig};
    use dispatcher::{create_adapter, ProtocolAdapter};
    use serde_json::{json, Value};

    type Received = Arc<Mutex<Vec<Value>>>;

    async fn receiver() -> (SocketAddr, Received) {
        let received: Received = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(|State(seen): State<Received>, Json(body): Json<Value>| async move {
                    seen.lock().unwrap().push(body);
                    Json(json!({"accepted": true}))
                }),
            )
            .route(
                "/slow",
                post(|| async {
                    tokio::time::sleep(Duration::from_secs(2)).await;
                    "late"
                }),
            )
            .route("/health", get(|| async { "ok" }))
            .with_state(received.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, received)
    }

    #[tokio::test]
    async fn test_webhook_delivery_and_timeout() {
        let (addr, received) = receiver().await;
        let adapter = create_adapter(
            "http",
            &json!({"base_url": format!("http://{addr}"), "endpoint": "/hook", "timeout_ms": 300}),
        )
        .unwrap();

        assert!(adapter.health_check().await);

        let result = adapter
            .send(&Payload::from(json!({"gaze": [0.1, 0.2]})), &TargetConfig::event("eye.gaze"))
            .await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.data.unwrap()["body"]["accepted"], json!(true));
        assert_eq!(received.lock().unwrap()[0]["gaze"], json!([0.1, 0.2]));

        let slow = TargetConfig {
            endpoint: Some("/slow".into()),
            ..Default::default()
        };
        let result = adapter.send(&Payload::from("x"), &slow).await;
        assert_eq!(result.code, Some(ErrorCode::Timeout));
        assert!(result.timing.duration < 1500);

        let missing = TargetConfig {
            endpoint: Some("/missing".into()),
            ..Default::default()
        };
        let result = adapter.send(&Payload::from("x"), &missing).await;
        assert_eq!(result.code, Some(ErrorCode::HttpError));

        let stats = adapter.stats();
        assert_eq!(stats.messages_attempted, 3);
        assert_eq!(stats.messages_succeeded, 1);
        assert_eq!(stats.messages_failed, 2);
        // the accepted reply and the 404 body both count
        assert!(stats.bytes_received > 0);
    }
}

#[cfg(test)]
mod fanout_e2e_tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    use contracts::{EventRouter, SseConfig, UdpConfig, UdpTarget, WebSocketConfig};
    use dispatcher::{
        Coordinator, HeadPosePacket, PayloadEnvelope, SseAdapter, SseFrame, UdpAdapter,
        WebSocketAdapter,
    };
    use futures::{SinkExt, StreamExt};
    use serde_json::{json, Value};
    use tokio::net::UdpSocket;
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    fn router() -> EventRouter {
        let table: BTreeMap<String, Vec<String>> = [
            ("alerts".to_string(), vec!["websocket".to_string(), "sse".to_string()]),
            ("head.*".to_string(), vec!["udp".to_string()]),
        ]
        .into();
        EventRouter::new(&table).unwrap()
    }

    async fn next_ws_json<S>(stream: &mut S) -> Value
    where
        S: futures::Stream<Item = Result<WsMessage, tokio_tungstenite::tungstenite::Error>>
            + Unpin,
    {
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), stream.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            if let WsMessage::Text(text) = frame {
                return serde_json::from_str(text.as_str()).unwrap();
            }
        }
    }

    async fn next_sse_frames(
        response: &mut reqwest::Response,
        buf: &mut String,
        want: usize,
    ) -> Vec<SseFrame> {
        loop {
            let frames = SseFrame::parse(buf);
            if frames.len() >= want {
                return frames;
            }
            let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
                .await
                .unwrap()
                .unwrap()
                .unwrap();
            buf.push_str(std::str::from_utf8(&chunk).unwrap());
        }
    }

    /// One coordinator, three live transports, routed by event name
    #[tokio::test]
    async fn test_routed_fanout_over_every_transport() {
        let pose_receiver = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let pose_port = pose_receiver.local_addr().unwrap().port();

        let ws = Arc::new(WebSocketAdapter::new(WebSocketConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        }));
        let sse = Arc::new(SseAdapter::new(SseConfig {
            host: "127.0.0.1".into(),
            port: 0,
            ..Default::default()
        }));
        let udp = Arc::new(UdpAdapter::new(UdpConfig {
            bind_address: "127.0.0.1".into(),
            targets: vec![UdpTarget::new("127.0.0.1", pose_port)],
            ..Default::default()
        }));

        let mut coordinator = Coordinator::new(router());
        coordinator.register("websocket", ws.clone());
        coordinator.register("sse", sse.clone());
        coordinator.register("udp", udp.clone());
        coordinator.start_all().await.unwrap();

        let ws_addr = ws.local_addr().await.unwrap();
        let (mut ws_client, _) = tokio_tungstenite::connect_async(format!("ws://{ws_addr}/ws"))
            .await
            .unwrap();
        assert_eq!(next_ws_json(&mut ws_client).await["type"], "connected");
        ws_client
            .send(WsMessage::text(r#"{"type":"subscribe","event":"alerts"}"#))
            .await
            .unwrap();
        assert_eq!(next_ws_json(&mut ws_client).await["type"], "subscribed");

        let sse_addr = sse.local_addr().await.unwrap();
        let mut sse_client = reqwest::get(format!("http://{sse_addr}/events?channels=alerts"))
            .await
            .unwrap();
        let mut sse_buf = String::new();
        next_sse_frames(&mut sse_client, &mut sse_buf, 1).await;

        let report = coordinator
            .distribute(&PayloadEnvelope::new("alerts", json!({"level": "high"})))
            .await;
        assert_eq!(report.results.keys().collect::<Vec<_>>(), vec!["sse", "websocket"]);
        assert!(report.all_succeeded(), "{report:?}");

        let frame = next_ws_json(&mut ws_client).await;
        assert_eq!(frame["event"], "alerts");
        assert_eq!(frame["data"]["level"], "high");

        let frames = next_sse_frames(&mut sse_client, &mut sse_buf, 2).await;
        assert_eq!(frames[1].event.as_deref(), Some("alerts"));
        assert_eq!(frames[1].data, r#"{"level":"high"}"#);

        let pose = HeadPosePacket {
            x: 1.0,
            y: 2.0,
            z: 50.0,
            yaw: 15.0,
            pitch: -3.0,
            roll: 0.5,
        };
        let report = coordinator.distribute(&pose.into_envelope()).await;
        assert_eq!(report.results.keys().collect::<Vec<_>>(), vec!["udp"]);
        assert!(report.all_succeeded(), "{report:?}");

        let mut datagram = [0u8; 128];
        let (n, _) = tokio::time::timeout(
            Duration::from_secs(5),
            pose_receiver.recv_from(&mut datagram),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(HeadPosePacket::from_bytes(&datagram[..n]), Some(pose));

        let report = coordinator
            .distribute(&PayloadEnvelope::new("unrouted", "x"))
            .await;
        assert!(report.results.is_empty());

        let stats = coordinator.stats();
        assert_eq!(stats["websocket"].active_connections, 1);
        assert_eq!(stats["sse"].messages_succeeded, 1);
        assert_eq!(stats["udp"].bytes_transmitted, HeadPosePacket::WIRE_LEN as u64);

        coordinator.shutdown().await;
        assert_eq!(ws.client_count(), 0);
        assert_eq!(sse.client_count(), 0);
    }

    /// Many datagram targets share one lazily opened socket
    #[tokio::test]
    async fn test_udp_targets_share_one_socket() {
        let mut receivers = Vec::new();
        let mut targets = Vec::new();
        for _ in 0..3 {
            let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
            targets.push(UdpTarget::new("127.0.0.1", socket.local_addr().unwrap().port()));
            receivers.push(socket);
        }
        let udp = Arc::new(UdpAdapter::new(UdpConfig {
            bind_address: "127.0.0.1".into(),
            targets,
            ..Default::default()
        }));

        let mut coordinator = Coordinator::new(EventRouter::default());
        coordinator.register("udp", udp.clone());

        for i in 0..4 {
            let report = coordinator
                .distribute(&PayloadEnvelope::new("tick", format!("n{i}")))
                .await;
            let data = report.results["udp"].data.clone().unwrap();
            assert_eq!(data["totalTargets"], json!(3));
            assert_eq!(data["successfulSends"], json!(3));
        }
        assert_eq!(udp.socket_initializations(), 1);

        for receiver in &receivers {
            let mut buf = [0u8; 16];
            let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
            assert_eq!(&buf[..n], b"n0");
        }
        coordinator.shutdown().await;
    }

    /// Idle clients are probed once, then evicted
    #[tokio::test]
    async fn test_idle_websocket_client_is_evicted() {
        let ws = WebSocketAdapter::new(WebSocketConfig {
            host: "127.0.0.1".into(),
            port: 0,
            heartbeat_interval_ms: 60_000,
            ..Default::default()
        });
        contracts::ProtocolAdapter::start(&ws).await.unwrap();
        let addr = ws.local_addr().await.unwrap();
        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
            .await
            .unwrap();
        next_ws_json(&mut client).await;
        assert_eq!(ws.client_count(), 1);

        let later = contracts::now_millis() + 61_000;
        let report = ws.sweep_idle(later).await;
        assert_eq!(report.evicted, 0);
        let report = ws.sweep_idle(later + 120_001).await;
        assert_eq!(report.evicted, 1);
        assert_eq!(ws.client_count(), 0);

        contracts::ProtocolAdapter::shutdown(&ws).await;
    }
}
