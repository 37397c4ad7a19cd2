//! # Tunnel Endpoint
//!
//! Accepts inbound agent connections and drives each socket through its
//! handshake and receive loop:
//!
//! ```text
//! AWAIT_AUTH ── auth frame within T_auth ──▶ AUTHENTICATING
//! AWAIT_AUTH ── timeout / wrong frame ─────▶ CLOSED(AUTH_REQUIRED)
//! AUTHENTICATING ── resolved ───────────────▶ ACTIVE
//! AUTHENTICATING ── rejected ───────────────▶ CLOSED(AUTH_FAILED)
//! ACTIVE ── disconnect / socket error ──────▶ CLOSED(NORMAL)
//! ```

use crate::auth::AuthRejection;
use crate::session::Session;
use crate::state::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use gateway_protocol::{AuthStatus, Frame};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let auth_frame = match tokio::time::timeout(state.config.auth_timeout, ws_stream.next()).await {
        Ok(Some(Ok(Message::Text(text)))) => match serde_json::from_str::<Frame>(&text) {
            Ok(frame @ Frame::AuthRequest { .. }) => frame,
            Ok(_) => {
                close_with(&mut ws_sink, "AUTH_REQUIRED", "first frame must be an auth request").await;
                return;
            }
            Err(e) => {
                close_with(&mut ws_sink, "AUTH_REQUIRED", &format!("malformed handshake frame: {e}")).await;
                return;
            }
        },
        Ok(_) => {
            close_with(&mut ws_sink, "AUTH_REQUIRED", "socket closed before handshake").await;
            return;
        }
        Err(_) => {
            close_with(&mut ws_sink, "AUTH_REQUIRED", "handshake timed out").await;
            return;
        }
    };

    let Frame::AuthRequest {
        gateway_token,
        agent_version,
        agent_hostname,
        agent_os,
        ..
    } = auth_frame
    else {
        unreachable!("matched above");
    };

    let resolution = match state.authenticator.authenticate(&gateway_token).await {
        Ok(resolution) => resolution,
        Err(rejection) => {
            let (status, reason) = match rejection {
                AuthRejection::Expired(reason) => (AuthStatus::TokenExpired, reason),
                AuthRejection::Revoked(reason) => (AuthStatus::TokenRevoked, reason),
                AuthRejection::Invalid(reason) => (AuthStatus::Failed, reason),
            };
            warn!(reason = %reason, status = ?status, "agent handshake rejected");
            let _ = send_frame(
                &mut ws_sink,
                Frame::AuthResponse {
                    timestamp: chrono::Utc::now(),
                    status,
                    session_id: None,
                    database_id: None,
                    database_name: None,
                    heartbeat_interval: None,
                    query_timeout: None,
                    error_message: Some(reason),
                },
            )
            .await;
            return;
        }
    };

    let session_id = Uuid::new_v4().to_string();
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel::<Frame>(256);

    let session = Arc::new(Session::new(
        session_id.clone(),
        resolution.database_id.clone(),
        resolution.database_name.clone(),
        resolution.tenant_id,
        agent_version,
        agent_hostname,
        agent_os,
        outbound_tx.clone(),
    ));
    state.registry.install(session.clone());

    info!(session_id = %session_id, database_id = %resolution.database_id, "agent session established");

    let heartbeat_interval = state.config.heartbeat_interval.as_secs();
    let query_timeout = state.config.default_query_timeout.as_secs();

    let outbound_task = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            let text = match serde_json::to_string(&frame) {
                Ok(t) => t,
                Err(e) => {
                    warn!(error = %e, "failed to serialize outbound frame");
                    continue;
                }
            };
            if ws_sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    if outbound_tx
        .send(Frame::AuthResponse {
            timestamp: chrono::Utc::now(),
            status: AuthStatus::Success,
            session_id: Some(session_id.clone()),
            database_id: Some(resolution.database_id.clone()),
            database_name: Some(resolution.database_name.clone()),
            heartbeat_interval: Some(heartbeat_interval),
            query_timeout: Some(query_timeout),
            error_message: None,
        })
        .await
        .is_err()
    {
        session.terminate();
        state.registry.remove(&session_id);
        outbound_task.abort();
        return;
    }

    loop {
        tokio::select! {
            // Fires when the liveness sweep or a replacing session calls
            // `terminate()` on this session out from under the read loop.
            // Without this arm `ws_stream.next()` blocks forever and the
            // socket is never actually closed.
            _ = session.terminated() => break,
            next = ws_stream.next() => {
                match next {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => {
                            if dispatch(&session, &outbound_tx, frame).await {
                                break;
                            }
                        }
                        Err(e) => {
                            debug!(error = %e, "dropping malformed frame");
                            let _ = outbound_tx
                                .send(Frame::error(None, "INVALID_MESSAGE", format!("malformed frame: {e}")))
                                .await;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                }
            }
        }
    }

    info!(session_id = %session_id, "agent session closed");
    outbound_task.abort();
    session.terminate();
    state.registry.remove(&session_id);
}

/// Dispatches one inbound frame per the receive-side rules: heartbeats
/// update liveness and ack, responses complete their pending slot,
/// disconnect notices terminate the session, and anything else is reported
/// back to the agent as an error frame without touching the socket.
///
/// Returns `true` when the caller's receive loop should stop reading this
/// socket (currently only an explicit `Disconnect` notice).
async fn dispatch(session: &Arc<Session>, outbound: &tokio::sync::mpsc::Sender<Frame>, frame: Frame) -> bool {
    match frame {
        Frame::Heartbeat {
            session_id,
            db_status,
            api_status,
            queries_executed,
            api_requests_executed,
            ..
        } => {
            session
                .record_heartbeat(db_status, api_status, queries_executed, api_requests_executed)
                .await;
            let _ = outbound
                .send(Frame::HeartbeatAck {
                    timestamp: chrono::Utc::now(),
                    session_id,
                    server_time: chrono::Utc::now(),
                })
                .await;
            false
        }
        Frame::QueryResponse { .. } | Frame::ApiResponse { .. } | Frame::EmployeeLookupResponse { .. } => {
            session.complete(frame);
            false
        }
        Frame::DbStatusUpdate { status, error_message, .. } => {
            session.update_db_status(status).await;
            if let Some(message) = error_message {
                warn!(session_id = %session.session_id, message = %message, "agent reported db status change");
            }
            false
        }
        Frame::Disconnect { reason, .. } => {
            info!(session_id = %session.session_id, reason = %reason, "agent requested disconnect");
            session.terminate();
            true
        }
        other => {
            warn!(session_id = %session.session_id, frame = ?other, "unexpected frame on active session");
            let _ = outbound
                .send(Frame::error(None, "INVALID_MESSAGE", "unexpected frame type on active session"))
                .await;
            false
        }
    }
}

async fn send_frame(
    sink: &mut futures::stream::SplitSink<WebSocket, Message>,
    frame: Frame,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(&frame).expect("frame always serializes");
    sink.send(Message::Text(text.into())).await
}

async fn close_with(sink: &mut futures::stream::SplitSink<WebSocket, Message>, code: &str, message: &str) {
    let _ = send_frame(
        sink,
        Frame::Error {
            timestamp: chrono::Utc::now(),
            error_code: code.to_string(),
            error_message: message.to_string(),
            request_id: None,
        },
    )
    .await;
    let _ = sink.close().await;
}
