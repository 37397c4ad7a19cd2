//! End-to-end exercises of the tunnel endpoint against a real Axum router
//! and an in-process WebSocket client standing in for the agent.

use futures::{SinkExt, StreamExt};
use gateway::auth::StaticTokenAuthenticator;
use gateway::config::GatewayConfig;
use gateway::{build_app, new_state};
use gateway_protocol::{AuthStatus, Frame, QueryStatus};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

async fn spawn_gateway(config: GatewayConfig, auth: Arc<StaticTokenAuthenticator>) -> SocketAddr {
    let state = new_state(auth, config);
    let app = build_app(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn fast_config() -> GatewayConfig {
    GatewayConfig {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        auth_timeout: Duration::from_millis(500),
        heartbeat_interval: Duration::from_secs(5),
        stale_after: Duration::from_millis(400),
        default_query_timeout: Duration::from_secs(5),
        liveness_sweep_interval: Duration::from_millis(50),
    }
}

#[tokio::test]
async fn happy_sql_roundtrip() {
    let auth = Arc::new(StaticTokenAuthenticator::new());
    auth.register("gw_test", "db-1", "Test DB", None).await;
    let addr = spawn_gateway(fast_config(), auth).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .expect("agent connects");

    send(&mut ws, Frame::AuthRequest {
        timestamp: chrono::Utc::now(),
        gateway_token: "gw_test".into(),
        agent_version: "1.0.0".into(),
        agent_hostname: Some("host-1".into()),
        agent_os: Some("linux".into()),
    })
    .await;

    let auth_response = recv(&mut ws).await;
    let session_id = match auth_response {
        Frame::AuthResponse {
            status: AuthStatus::Success,
            session_id: Some(session_id),
            ..
        } => session_id,
        other => panic!("expected successful auth response, got {other:?}"),
    };

    // Agent-side responder: answers the next query request with a canned row.
    let responder = tokio::spawn(async move {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => {
                    if let Ok(Frame::QueryRequest { request_id, .. }) = serde_json::from_str(&text) {
                        let mut row = std::collections::HashMap::new();
                        row.insert("x".to_string(), serde_json::json!(1));
                        send(
                            &mut ws,
                            Frame::QueryResponse {
                                timestamp: chrono::Utc::now(),
                                request_id,
                                status: QueryStatus::Success,
                                columns: vec!["x".into()],
                                rows: vec![row],
                                row_count: 1,
                                execution_time_ms: Some(1),
                                error_message: None,
                                error_code: None,
                            },
                        )
                        .await;
                    }
                }
                _ => break,
            }
        }
    });

    // Give the handshake a moment to land in the registry before querying.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let client = reqwest::Client::new();
    let response: serde_json::Value = client
        .post(format!("http://{addr}/api/query"))
        .json(&serde_json::json!({
            "database_id": "db-1",
            "sql_query": "SELECT 1 AS x",
            "timeout": 5,
            "max_rows": 10,
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(response["row_count"], 1);
    assert_eq!(response["rows"][0]["x"], 1);
    let _ = session_id;
    responder.abort();
}

#[tokio::test]
async fn unknown_frame_gets_error_and_session_stays_active() {
    let auth = Arc::new(StaticTokenAuthenticator::new());
    auth.register("gw_test", "db-2", "Test DB 2", None).await;
    let addr = spawn_gateway(fast_config(), auth).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    send(&mut ws, Frame::AuthRequest {
        timestamp: chrono::Utc::now(),
        gateway_token: "gw_test".into(),
        agent_version: "1.0.0".into(),
        agent_hostname: None,
        agent_os: None,
    })
    .await;
    let _ = recv(&mut ws).await;

    ws.send(Message::Text(r#"{"type":"BOGUS","timestamp":"2024-01-01T00:00:00Z"}"#.into()))
        .await
        .unwrap();

    let reply = recv(&mut ws).await;
    match reply {
        Frame::Error { error_code, .. } => assert_eq!(error_code, "INVALID_MESSAGE"),
        other => panic!("expected Frame::Error, got {other:?}"),
    }

    // Socket must still be usable: a heartbeat sent right after is acked.
    send(&mut ws, Frame::Heartbeat {
        timestamp: chrono::Utc::now(),
        session_id: "whatever".into(),
        db_status: gateway_protocol::DbStatus::Connected,
        api_status: gateway_protocol::DbStatus::Connected,
        queries_executed: 0,
        api_requests_executed: 0,
        uptime_seconds: 1,
    })
    .await;
    let ack = recv(&mut ws).await;
    assert!(matches!(ack, Frame::HeartbeatAck { .. }));
}

#[tokio::test]
async fn auth_timeout_closes_socket() {
    let auth = Arc::new(StaticTokenAuthenticator::new());
    let addr = spawn_gateway(fast_config(), auth).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws"))
        .await
        .unwrap();

    // Say nothing; the gateway's auth_timeout is 500ms in fast_config().
    let next = tokio::time::timeout(Duration::from_secs(2), ws.next()).await;
    match next {
        Ok(Some(Ok(Message::Text(text)))) => {
            let frame: Frame = serde_json::from_str(&text).unwrap();
            assert!(matches!(frame, Frame::Error { .. }));
        }
        Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {}
        other => panic!("unexpected: {other:?}"),
    }
}

#[tokio::test]
async fn replacement_supersedes_old_session_and_closes_its_socket() {
    let auth = Arc::new(StaticTokenAuthenticator::new());
    auth.register("gw_a", "db-3", "Test DB 3", None).await;
    auth.register("gw_b", "db-3", "Test DB 3", None).await;
    let addr = spawn_gateway(fast_config(), auth).await;

    let (mut ws1, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();
    send(&mut ws1, Frame::AuthRequest {
        timestamp: chrono::Utc::now(),
        gateway_token: "gw_a".into(),
        agent_version: "1.0.0".into(),
        agent_hostname: None,
        agent_os: None,
    })
    .await;
    let _ = recv(&mut ws1).await;

    let (mut ws2, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();
    send(&mut ws2, Frame::AuthRequest {
        timestamp: chrono::Utc::now(),
        gateway_token: "gw_b".into(),
        agent_version: "1.0.0".into(),
        agent_hostname: None,
        agent_os: None,
    })
    .await;
    let _ = recv(&mut ws2).await;

    // The superseded session's socket must actually be closed by the
    // gateway, not left hanging until some later sweep.
    let closed = tokio::time::timeout(Duration::from_secs(2), ws1.next()).await;
    match closed {
        Ok(None) => {}
        Ok(Some(Ok(Message::Close(_)))) => {}
        Ok(Some(Err(_))) => {}
        other => panic!("expected old session's socket to close, got {other:?}"),
    }

    let sessions: serde_json::Value = reqwest::Client::new()
        .get(format!("http://{addr}/api/sessions"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(sessions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn staleness_expires_session_and_closes_its_socket() {
    let auth = Arc::new(StaticTokenAuthenticator::new());
    auth.register("gw_stale", "db-4", "Test DB 4", None).await;
    let addr = spawn_gateway(fast_config(), auth).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();
    send(&mut ws, Frame::AuthRequest {
        timestamp: chrono::Utc::now(),
        gateway_token: "gw_stale".into(),
        agent_version: "1.0.0".into(),
        agent_hostname: None,
        agent_os: None,
    })
    .await;
    let _ = recv(&mut ws).await;

    // Never heartbeat: fast_config()'s stale_after is 400ms, swept every 50ms.
    tokio::time::sleep(Duration::from_millis(700)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/query"))
        .json(&serde_json::json!({
            "database_id": "db-4",
            "sql_query": "SELECT 1",
            "timeout": 1,
            "max_rows": 10,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    let closed = tokio::time::timeout(Duration::from_secs(1), ws.next()).await;
    match closed {
        Ok(None) => {}
        Ok(Some(Ok(Message::Close(_)))) => {}
        Ok(Some(Err(_))) => {}
        other => panic!("expected the stale session's socket to close, got {other:?}"),
    }
}

#[tokio::test]
async fn query_past_its_timeout_reports_timeout_and_late_reply_is_dropped() {
    let auth = Arc::new(StaticTokenAuthenticator::new());
    auth.register("gw_slow", "db-5", "Test DB 5", None).await;
    let addr = spawn_gateway(fast_config(), auth).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://{addr}/ws")).await.unwrap();
    send(&mut ws, Frame::AuthRequest {
        timestamp: chrono::Utc::now(),
        gateway_token: "gw_slow".into(),
        agent_version: "1.0.0".into(),
        agent_hostname: None,
        agent_os: None,
    })
    .await;
    let _ = recv(&mut ws).await;

    // Agent-side responder that answers long after the caller gives up.
    let responder = tokio::spawn(async move {
        if let Some(Ok(Message::Text(text))) = ws.next().await {
            if let Ok(Frame::QueryRequest { request_id, .. }) = serde_json::from_str::<Frame>(&text) {
                tokio::time::sleep(Duration::from_secs(7)).await;
                let mut row = std::collections::HashMap::new();
                row.insert("x".to_string(), serde_json::json!(1));
                send(
                    &mut ws,
                    Frame::QueryResponse {
                        timestamp: chrono::Utc::now(),
                        request_id,
                        status: QueryStatus::Success,
                        columns: vec!["x".into()],
                        rows: vec![row],
                        row_count: 1,
                        execution_time_ms: Some(1),
                        error_message: None,
                        error_code: None,
                    },
                )
                .await;
            }
        }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = reqwest::Client::new()
        .post(format!("http://{addr}/api/query"))
        .json(&serde_json::json!({
            "database_id": "db-5",
            "sql_query": "SELECT SLOW()",
            "timeout": 1,
            "max_rows": 10,
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::GATEWAY_TIMEOUT);

    responder.abort();
}

async fn send(ws: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>, frame: Frame) {
    let text = serde_json::to_string(&frame).unwrap();
    ws.send(Message::Text(text.into())).await.unwrap();
}

async fn recv(ws: &mut tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>) -> Frame {
    loop {
        match ws.next().await.expect("socket open").unwrap() {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            _ => continue,
        }
    }
}
