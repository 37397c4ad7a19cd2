//! # Agent Connection
//!
//! Maintains exactly one healthy tunnel to the Gateway: dial, authenticate,
//! run the receive/heartbeat loop, reconnect with backoff on failure.
//! Generalized from the teacher's `run_agent_loop` and the original Python
//! `GatewayConnection.run` in `connection.py`, replacing the teacher's raw
//! `WsMessage` enum and Tauri event emission with the shared `Frame` wire
//! type and structured logging.
//!
//! State machine: `IDLE -> DIALING -> AUTHENTICATING -> CONNECTED`, with
//! any dial/handshake/socket failure routing to `BACKOFF -> DIALING` and an
//! explicit stop request routing to `STOPPED` from any state.

use crate::config::{AgentConfig, EmployeeSchemaConfig};
use crate::employee_executor::EmployeeLookupExecutor;
use crate::http_executor::HttpExecutor;
use crate::runtime::AgentRuntime;
use crate::sql_executor::SqlExecutor;
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use gateway_protocol::{ApiMethod, ApiStatus, AuthStatus, DbStatus, EmployeeLookupType, Frame, GatewayError, QueryStatus};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Semaphore};
use tokio::time::timeout as tokio_timeout;
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message, Connector, MaybeTlsStream, WebSocketStream};
use tracing::{info, warn};

const AUTH_TIMEOUT: Duration = Duration::from_secs(30);
static AGENT_VERSION: &str = env!("CARGO_PKG_VERSION");

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SharedSink = Arc<Mutex<SplitSink<WsStream, Message>>>;

/// A failed dial/handshake attempt, tagged with whether retrying can help.
/// A rejected or revoked credential will never succeed on retry — the agent
/// must stop and wait for an operator to re-provision it — while a dropped
/// socket, a timed-out handshake, or an expired token (which a re-issued
/// token might clear up on the next attempt) are worth retrying with
/// backoff.
#[derive(Debug)]
enum DialError {
    Retryable(String),
    Fatal(String),
}

impl std::fmt::Display for DialError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialError::Retryable(msg) | DialError::Fatal(msg) => write!(f, "{msg}"),
        }
    }
}

impl DialError {
    fn is_fatal(&self) -> bool {
        matches!(self, DialError::Fatal(_))
    }
}

pub struct AgentConnection {
    config: AgentConfig,
    runtime: Arc<AgentRuntime>,
    sql: Arc<SqlExecutor>,
    http: Arc<HttpExecutor>,
    semaphore: Arc<Semaphore>,
    stop: Arc<AtomicBool>,
}

impl AgentConnection {
    pub fn new(config: AgentConfig) -> Self {
        let sql = Arc::new(SqlExecutor::new(config.database.clone()));
        let http = Arc::new(HttpExecutor::new(config.http.clone()));
        let semaphore = Arc::new(Semaphore::new(config.executor.max_concurrent_requests.max(1)));
        Self {
            runtime: Arc::new(AgentRuntime::new()),
            sql,
            http,
            semaphore,
            stop: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    pub fn runtime(&self) -> Arc<AgentRuntime> {
        self.runtime.clone()
    }

    /// A clone-able handle a signal handler can flip to request shutdown.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Connect/authenticate/serve/backoff forever, until stopped or
    /// `max_reconnect_attempts` dial failures in a row are reached.
    pub async fn run(&self) {
        let mut attempts: u32 = 0;
        while !self.stop.load(Ordering::Relaxed) {
            match self.dial_and_authenticate().await {
                Ok((ws, session_id, heartbeat_interval)) => {
                    attempts = 0;
                    info!(session_id = %session_id, "agent authenticated with gateway");
                    self.serve(ws, session_id, heartbeat_interval).await;
                }
                Err(err) if err.is_fatal() => {
                    tracing::error!(reason = %err, "gateway rejected this agent's credential, stopping");
                    self.stop.store(true, Ordering::Relaxed);
                    break;
                }
                Err(err) => {
                    attempts += 1;
                    warn!(attempt = attempts, reason = %err, "gateway connection failed");
                    let ceiling = self.config.gateway.max_reconnect_attempts;
                    if ceiling > 0 && attempts >= ceiling {
                        tracing::error!("max reconnect attempts reached, stopping agent connection");
                        break;
                    }
                }
            }

            if self.stop.load(Ordering::Relaxed) {
                break;
            }
            tokio::time::sleep(self.config.gateway.reconnect_delay()).await;
        }
    }

    async fn dial_and_authenticate(&self) -> Result<(WsStream, String, Duration), DialError> {
        info!(url = %self.config.gateway.saas_url, "dialing gateway");
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(!self.config.gateway.ssl_verify)
            .danger_accept_invalid_hostnames(!self.config.gateway.ssl_verify)
            .build()
            .map_err(|e| DialError::Retryable(format!("failed to build tls connector: {e}")))?;
        let (mut ws, _) = connect_async_tls_with_config(
            &self.config.gateway.saas_url,
            None,
            false,
            Some(Connector::NativeTls(connector)),
        )
        .await
        .map_err(|e| DialError::Retryable(format!("dial failed: {e}")))?;

        let hostname = hostname::get().ok().and_then(|h| h.into_string().ok());
        let auth_request = Frame::AuthRequest {
            timestamp: Utc::now(),
            gateway_token: self.config.gateway.gateway_token.clone(),
            agent_version: AGENT_VERSION.to_string(),
            agent_hostname: hostname,
            agent_os: Some(format!("{} {}", std::env::consts::OS, std::env::consts::ARCH)),
        };
        let text = serde_json::to_string(&auth_request).map_err(|e| DialError::Retryable(e.to_string()))?;
        ws.send(Message::Text(text.into()))
            .await
            .map_err(|e| DialError::Retryable(format!("send failed: {e}")))?;

        let response = tokio_timeout(AUTH_TIMEOUT, ws.next())
            .await
            .map_err(|_| DialError::Retryable("authentication timed out".to_string()))?
            .ok_or_else(|| DialError::Retryable("connection closed during handshake".to_string()))?
            .map_err(|e| DialError::Retryable(format!("socket error during handshake: {e}")))?;

        let text = match response {
            Message::Text(text) => text,
            other => return Err(DialError::Retryable(format!("unexpected handshake frame: {other:?}"))),
        };
        let frame: Frame =
            serde_json::from_str(&text).map_err(|e| DialError::Retryable(format!("invalid handshake response: {e}")))?;

        match frame {
            Frame::AuthResponse {
                status: AuthStatus::Success,
                session_id: Some(session_id),
                database_name,
                heartbeat_interval,
                ..
            } => {
                info!(database = ?database_name, "mapped to local database");
                let interval = Duration::from_secs(heartbeat_interval.unwrap_or(self.config.gateway.heartbeat_interval));
                Ok((ws, session_id, interval))
            }
            // A revoked or outright-rejected credential will never succeed on
            // retry; an expired one might, once an operator rotates it in,
            // so it's worth a backoff-and-retry rather than stopping outright.
            Frame::AuthResponse {
                status: status @ (AuthStatus::Failed | AuthStatus::TokenRevoked),
                error_message,
                ..
            } => Err(DialError::Fatal(format!(
                "authentication rejected: {status:?} ({})",
                error_message.unwrap_or_default()
            ))),
            Frame::AuthResponse { status, error_message, .. } => Err(DialError::Retryable(format!(
                "authentication rejected: {status:?} ({})",
                error_message.unwrap_or_default()
            ))),
            other => Err(DialError::Retryable(format!("unexpected response type: {other:?}"))),
        }
    }

    async fn serve(&self, ws: WsStream, session_id: String, heartbeat_interval: Duration) {
        let (sink, mut stream) = ws.split();
        let sink: SharedSink = Arc::new(Mutex::new(sink));

        let heartbeat_task = {
            let sink = sink.clone();
            let runtime = self.runtime.clone();
            let session_id = session_id.clone();
            let stop = self.stop.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(heartbeat_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if stop.load(Ordering::Relaxed) {
                        break;
                    }
                    let frame = Frame::Heartbeat {
                        timestamp: Utc::now(),
                        session_id: session_id.clone(),
                        db_status: runtime.db_status().await,
                        api_status: runtime.api_status().await,
                        queries_executed: runtime.queries_executed(),
                        api_requests_executed: runtime.api_requests_executed(),
                        uptime_seconds: runtime.uptime_seconds(),
                    };
                    if send_frame(&sink, &frame).await.is_err() {
                        break;
                    }
                }
            })
        };

        loop {
            if self.stop.load(Ordering::Relaxed) {
                let disconnect = Frame::Disconnect {
                    timestamp: Utc::now(),
                    session_id: session_id.clone(),
                    reason: "normal_shutdown".to_string(),
                };
                send_frame(&sink, &disconnect).await.ok();
                break;
            }

            let next = tokio_timeout(Duration::from_millis(500), stream.next()).await;
            let message = match next {
                Err(_) => continue,
                Ok(None) => {
                    warn!("connection closed by gateway");
                    break;
                }
                Ok(Some(Err(e))) => {
                    warn!(error = %e, "websocket error");
                    break;
                }
                Ok(Some(Ok(message))) => message,
            };

            let text = match message {
                Message::Text(text) => text,
                Message::Close(_) => {
                    info!("gateway closed the connection");
                    break;
                }
                _ => continue,
            };

            let frame: Frame = match serde_json::from_str(&text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "invalid frame from gateway");
                    continue;
                }
            };

            self.dispatch(frame, sink.clone()).await;
        }

        heartbeat_task.abort();
    }

    async fn dispatch(&self, frame: Frame, sink: SharedSink) {
        match frame {
            Frame::QueryRequest {
                request_id,
                sql_query,
                timeout,
                max_rows,
                ..
            } => {
                let sql = self.sql.clone();
                let runtime = self.runtime.clone();
                let semaphore = self.semaphore.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let response = handle_query(sql, runtime, request_id, sql_query, timeout, max_rows).await;
                    send_frame(&sink, &response).await.ok();
                });
            }
            Frame::ApiRequest {
                request_id,
                method,
                endpoint,
                headers,
                body,
                query_params,
                timeout,
            } => {
                let http = self.http.clone();
                let runtime = self.runtime.clone();
                let semaphore = self.semaphore.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let response = handle_api(http, runtime, request_id, method, endpoint, headers, body, query_params, timeout).await;
                    send_frame(&sink, &response).await.ok();
                });
            }
            Frame::EmployeeLookupRequest {
                request_id,
                identifier,
                lookup_type,
                timeout,
            } => {
                let sql = self.sql.clone();
                let schema = self.config.employee_schema.clone();
                let semaphore = self.semaphore.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await;
                    let response = handle_employee(sql, schema, request_id, identifier, lookup_type, timeout).await;
                    send_frame(&sink, &response).await.ok();
                });
            }
            Frame::HeartbeatAck { .. } => {}
            Frame::Error { error_message, .. } => warn!(%error_message, "gateway reported an error"),
            other => warn!(frame = ?other, "unexpected frame from gateway"),
        }
    }
}

async fn send_frame(sink: &SharedSink, frame: &Frame) -> Result<(), ()> {
    let text = serde_json::to_string(frame).map_err(|_| ())?;
    let mut guard = sink.lock().await;
    guard.send(Message::Text(text.into())).await.map_err(|_| ())
}

async fn handle_query(
    sql: Arc<SqlExecutor>,
    runtime: Arc<AgentRuntime>,
    request_id: String,
    sql_query: String,
    timeout_secs: u64,
    max_rows: u32,
) -> Frame {
    let timeout = Duration::from_secs(timeout_secs);
    match sql.execute_query(&sql_query, timeout, max_rows).await {
        Ok(outcome) => {
            runtime.record_query();
            runtime.set_db_status(DbStatus::Connected).await;
            Frame::QueryResponse {
                timestamp: Utc::now(),
                request_id,
                status: QueryStatus::Success,
                columns: outcome.columns,
                rows: outcome.rows,
                row_count: outcome.row_count,
                execution_time_ms: Some(outcome.execution_time_ms),
                error_message: None,
                error_code: None,
            }
        }
        Err(err) => {
            let status = query_status_for(&err);
            if matches!(status, QueryStatus::ConnectionError) {
                runtime.set_db_status(DbStatus::Error).await;
            }
            Frame::QueryResponse {
                timestamp: Utc::now(),
                request_id,
                status,
                columns: Vec::new(),
                rows: Vec::new(),
                row_count: 0,
                execution_time_ms: None,
                error_message: Some(err.to_string()),
                error_code: Some(err.code().to_string()),
            }
        }
    }
}

fn query_status_for(err: &GatewayError) -> QueryStatus {
    match err {
        GatewayError::Timeout(_) => QueryStatus::Timeout,
        GatewayError::QueryError { error_code: Some(code), .. } if code == "CONNECTION_ERROR" => QueryStatus::ConnectionError,
        _ => QueryStatus::Error,
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_api(
    http: Arc<HttpExecutor>,
    runtime: Arc<AgentRuntime>,
    request_id: String,
    method: ApiMethod,
    endpoint: String,
    headers: HashMap<String, String>,
    body: Option<serde_json::Value>,
    query_params: HashMap<String, String>,
    timeout: u64,
) -> Frame {
    let outcome = http.execute(method, &endpoint, headers, body, query_params, Some(timeout)).await;
    runtime.record_api_request();
    let api_status = match outcome.status {
        ApiStatus::Success => DbStatus::Connected,
        ApiStatus::NotConfigured => DbStatus::Disconnected,
        _ => DbStatus::Error,
    };
    runtime.set_api_status(api_status).await;

    Frame::ApiResponse {
        timestamp: Utc::now(),
        request_id,
        status: outcome.status,
        status_code: outcome.status_code,
        headers: outcome.headers,
        body: outcome.body,
        execution_time_ms: Some(outcome.execution_time_ms),
        error_message: outcome.error_message,
        error_code: outcome.error_code,
    }
}

async fn handle_employee(
    sql: Arc<SqlExecutor>,
    schema: EmployeeSchemaConfig,
    request_id: String,
    identifier: String,
    lookup_type: EmployeeLookupType,
    timeout: u64,
) -> Frame {
    let executor = EmployeeLookupExecutor::new(&sql, &schema);
    let outcome = executor.lookup(&identifier, lookup_type, Duration::from_secs(timeout)).await;
    Frame::EmployeeLookupResponse {
        timestamp: Utc::now(),
        request_id,
        status: outcome.status,
        employee: outcome.employee,
        employees: outcome.employees,
        execution_time_ms: Some(outcome.execution_time_ms),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_protocol::GatewayError;

    #[test]
    fn timeout_error_maps_to_timeout_status() {
        assert_eq!(query_status_for(&GatewayError::Timeout(5)), QueryStatus::Timeout);
    }

    #[test]
    fn connection_error_code_maps_to_connection_error_status() {
        let err = GatewayError::QueryError {
            message: "broken pipe".into(),
            error_code: Some("CONNECTION_ERROR".into()),
        };
        assert_eq!(query_status_for(&err), QueryStatus::ConnectionError);
    }

    #[test]
    fn generic_query_error_maps_to_error_status() {
        let err = GatewayError::QueryError {
            message: "syntax error".into(),
            error_code: None,
        };
        assert_eq!(query_status_for(&err), QueryStatus::Error);
    }

    #[test]
    fn fatal_dial_error_is_flagged_fatal() {
        assert!(DialError::Fatal("revoked".into()).is_fatal());
    }

    #[test]
    fn retryable_dial_error_is_not_flagged_fatal() {
        assert!(!DialError::Retryable("dial failed".into()).is_fatal());
    }
}
