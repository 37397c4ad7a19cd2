//! # Gateway Synchronous API
//!
//! The interface the rest of the cloud platform consumes: a plain
//! `GatewayHandle` library surface plus a thin REST veneer over it for this
//! crate's own demo/test binary. `GatewayHandle` is deliberately small and
//! synchronous-looking (async fns returning a typed `Result`) — callers
//! never see tunnel internals.

use crate::router::{ConnectionMode, ConnectionStatus, QueryRouter};
use crate::session::SessionSnapshot;
use crate::state::AppState;
use axum::extract::{Path, Query, State};
use axum::{Json, Router};
use axum::routing::{get, post};
use gateway_protocol::{ApiMethod, ApiStatus, EmployeeLookupStatus, EmployeeLookupType, Frame, GatewayError, QueryStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct GatewayHandle {
    router: Arc<QueryRouter>,
    default_timeout: Duration,
}

impl GatewayHandle {
    pub fn new(router: Arc<QueryRouter>, default_timeout: Duration) -> Self {
        Self { router, default_timeout }
    }

    pub async fn execute_query(
        &self,
        database_id: &str,
        sql_query: &str,
        timeout: Option<Duration>,
        max_rows: u32,
        user_id: Option<String>,
        conversation_id: Option<String>,
        mode: ConnectionMode,
    ) -> Result<QueryResult, GatewayError> {
        let timeout = timeout.unwrap_or(self.default_timeout);
        let use_gateway = self.router.should_use_gateway(database_id, mode).await?;

        if use_gateway {
            let session = self
                .router
                .active_session(database_id)
                .await
                .ok_or_else(|| GatewayError::GatewayNotConnected {
                    database_id: database_id.to_string(),
                    detail: None,
                })?;

            let request_id = uuid::Uuid::new_v4().to_string();
            let response = session
                .request(
                    Frame::QueryRequest {
                        timestamp: chrono::Utc::now(),
                        request_id,
                        sql_query: sql_query.to_string(),
                        timeout: timeout.as_secs(),
                        max_rows,
                        user_id,
                        conversation_id,
                    },
                    timeout,
                )
                .await?;

            match response {
                Frame::QueryResponse {
                    status: QueryStatus::Success,
                    columns,
                    rows,
                    row_count,
                    execution_time_ms,
                    ..
                } => Ok(QueryResult {
                    columns,
                    rows,
                    row_count,
                    execution_time_ms,
                }),
                Frame::QueryResponse {
                    status: QueryStatus::Timeout,
                    ..
                } => Err(GatewayError::Timeout(timeout.as_secs())),
                Frame::QueryResponse {
                    status: QueryStatus::ConnectionError,
                    error_message,
                    ..
                } => Err(GatewayError::QueryError {
                    message: error_message.unwrap_or_else(|| "connection error".into()),
                    error_code: Some("CONNECTION_ERROR".into()),
                }),
                Frame::QueryResponse {
                    error_message,
                    error_code,
                    ..
                } => Err(GatewayError::QueryError {
                    message: error_message.unwrap_or_else(|| "query failed".into()),
                    error_code,
                }),
                _ => Err(GatewayError::ProtocolError("unexpected response to query request".into())),
            }
        } else {
            let (columns, rows) = self
                .router
                .direct()
                .execute_query(database_id, sql_query, timeout, max_rows)
                .await?;
            let row_count = rows.len() as u64;
            Ok(QueryResult {
                columns,
                rows,
                row_count,
                execution_time_ms: None,
            })
        }
    }

    pub async fn execute_api(
        &self,
        database_id: &str,
        method: ApiMethod,
        endpoint: &str,
        headers: HashMap<String, String>,
        body: Option<serde_json::Value>,
        query_params: HashMap<String, String>,
        timeout: Duration,
    ) -> Result<ApiResult, GatewayError> {
        let session = self
            .router
            .active_session(database_id)
            .await
            .ok_or_else(|| GatewayError::GatewayNotConnected {
                database_id: database_id.to_string(),
                detail: None,
            })?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let response = session
            .request(
                Frame::ApiRequest {
                    timestamp: chrono::Utc::now(),
                    request_id,
                    method,
                    endpoint: endpoint.to_string(),
                    headers,
                    body,
                    query_params,
                    timeout: timeout.as_secs(),
                },
                timeout,
            )
            .await?;

        match response {
            Frame::ApiResponse {
                status: ApiStatus::Success,
                status_code,
                headers,
                body,
                execution_time_ms,
                ..
            } => Ok(ApiResult {
                status_code,
                headers,
                body,
                execution_time_ms,
            }),
            Frame::ApiResponse {
                status: ApiStatus::NotConfigured,
                ..
            } => Err(GatewayError::NotConfigured),
            Frame::ApiResponse {
                status: ApiStatus::Timeout, ..
            } => Err(GatewayError::Timeout(timeout.as_secs())),
            Frame::ApiResponse {
                error_message, error_code, ..
            } => Err(GatewayError::QueryError {
                message: error_message.unwrap_or_else(|| "api call failed".into()),
                error_code,
            }),
            _ => Err(GatewayError::ProtocolError("unexpected response to api request".into())),
        }
    }

    pub async fn lookup_employee(
        &self,
        database_id: &str,
        identifier: &str,
        lookup_type: EmployeeLookupType,
        timeout: Duration,
    ) -> Result<EmployeeLookupResult, GatewayError> {
        let session = self
            .router
            .active_session(database_id)
            .await
            .ok_or_else(|| GatewayError::GatewayNotConnected {
                database_id: database_id.to_string(),
                detail: None,
            })?;

        let request_id = uuid::Uuid::new_v4().to_string();
        let response = session
            .request(
                Frame::EmployeeLookupRequest {
                    timestamp: chrono::Utc::now(),
                    request_id,
                    identifier: identifier.to_string(),
                    lookup_type,
                    timeout: timeout.as_secs(),
                },
                timeout,
            )
            .await?;

        match response {
            Frame::EmployeeLookupResponse {
                status,
                employee,
                employees,
                execution_time_ms,
                ..
            } => Ok(EmployeeLookupResult {
                status,
                employee,
                employees,
                execution_time_ms,
            }),
            _ => Err(GatewayError::ProtocolError("unexpected response to employee lookup".into())),
        }
    }

    pub async fn is_connected(&self, database_id: &str) -> bool {
        self.router.active_session(database_id).await.is_some()
    }

    pub async fn connection_status(&self, database_id: &str, database_name: &str, mode: ConnectionMode) -> ConnectionStatus {
        self.router.connection_status(database_id, database_name, mode).await
    }

    pub async fn sessions(&self) -> Vec<SessionSnapshot> {
        self.router.registry().snapshot().await
    }
}

#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, serde_json::Value>>,
    pub row_count: u64,
    pub execution_time_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct ApiResult {
    pub status_code: Option<u16>,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    pub execution_time_ms: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct EmployeeLookupResult {
    pub status: EmployeeLookupStatus,
    pub employee: Option<HashMap<String, serde_json::Value>>,
    pub employees: Vec<HashMap<String, serde_json::Value>>,
    pub execution_time_ms: Option<u64>,
}

// ─── REST veneer ────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct QueryRequestBody {
    pub database_id: String,
    pub sql_query: String,
    pub timeout: Option<u64>,
    #[serde(default = "default_max_rows")]
    pub max_rows: u32,
    pub user_id: Option<String>,
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub mode: RoutingMode,
}

fn default_max_rows() -> u32 {
    1000
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    #[default]
    Auto,
    GatewayOnly,
    DirectOnly,
}

impl From<RoutingMode> for ConnectionMode {
    fn from(mode: RoutingMode) -> Self {
        match mode {
            RoutingMode::Auto => ConnectionMode::Auto,
            RoutingMode::GatewayOnly => ConnectionMode::GatewayOnly,
            RoutingMode::DirectOnly => ConnectionMode::DirectOnly,
        }
    }
}

pub fn routes() -> Router<AppStateWithHandle> {
    Router::new()
        .route("/api/query", post(execute_query))
        .route("/api/call", post(execute_api))
        .route("/api/employees/{identifier}", get(lookup_employee))
        .route("/api/databases/{database_id}/status", get(connection_status))
        .route("/api/sessions", get(sessions))
}

#[derive(Clone)]
pub struct AppStateWithHandle {
    pub app: AppState,
    pub handle: GatewayHandle,
}

async fn execute_query(
    State(state): State<AppStateWithHandle>,
    Json(body): Json<QueryRequestBody>,
) -> Result<Json<QueryResult>, (axum::http::StatusCode, String)> {
    state
        .handle
        .execute_query(
            &body.database_id,
            &body.sql_query,
            body.timeout.map(Duration::from_secs),
            body.max_rows,
            body.user_id,
            body.conversation_id,
            body.mode.into(),
        )
        .await
        .map(Json)
        .map_err(as_http_error)
}

#[derive(Deserialize)]
pub struct ApiCallRequestBody {
    pub database_id: String,
    pub method: ApiMethod,
    pub endpoint: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
}

async fn execute_api(
    State(state): State<AppStateWithHandle>,
    Json(body): Json<ApiCallRequestBody>,
) -> Result<Json<ApiResult>, (axum::http::StatusCode, String)> {
    state
        .handle
        .execute_api(
            &body.database_id,
            body.method,
            &body.endpoint,
            body.headers,
            body.body,
            body.query_params,
            Duration::from_secs(body.timeout),
        )
        .await
        .map(Json)
        .map_err(as_http_error)
}

#[derive(Deserialize)]
pub struct EmployeeLookupQuery {
    pub database_id: String,
    #[serde(default)]
    pub lookup_type: EmployeeLookupTypeParam,
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeLookupTypeParam {
    #[default]
    Auto,
    Code,
    Name,
    Card,
}

impl From<EmployeeLookupTypeParam> for EmployeeLookupType {
    fn from(t: EmployeeLookupTypeParam) -> Self {
        match t {
            EmployeeLookupTypeParam::Auto => EmployeeLookupType::Auto,
            EmployeeLookupTypeParam::Code => EmployeeLookupType::Code,
            EmployeeLookupTypeParam::Name => EmployeeLookupType::Name,
            EmployeeLookupTypeParam::Card => EmployeeLookupType::Card,
        }
    }
}

async fn lookup_employee(
    State(state): State<AppStateWithHandle>,
    Path(identifier): Path<String>,
    Query(params): Query<EmployeeLookupQuery>,
) -> Result<Json<EmployeeLookupResult>, (axum::http::StatusCode, String)> {
    state
        .handle
        .lookup_employee(
            &params.database_id,
            &identifier,
            params.lookup_type.into(),
            Duration::from_secs(params.timeout),
        )
        .await
        .map(Json)
        .map_err(as_http_error)
}

#[derive(Deserialize)]
pub struct ConnectionStatusQuery {
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default)]
    pub mode: RoutingMode,
}

async fn connection_status(
    State(state): State<AppStateWithHandle>,
    Path(database_id): Path<String>,
    Query(params): Query<ConnectionStatusQuery>,
) -> Json<ConnectionStatus> {
    let database_name = params.database_name.unwrap_or_else(|| database_id.clone());
    Json(
        state
            .handle
            .connection_status(&database_id, &database_name, params.mode.into())
            .await,
    )
}

async fn sessions(State(state): State<AppStateWithHandle>) -> Json<Vec<SessionSnapshot>> {
    Json(state.handle.sessions().await)
}

fn as_http_error(err: GatewayError) -> (axum::http::StatusCode, String) {
    use axum::http::StatusCode;
    let status = match &err {
        GatewayError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
        GatewayError::GatewayNotConnected { .. } => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        GatewayError::ConnectionClosed => StatusCode::SERVICE_UNAVAILABLE,
        GatewayError::ProtocolError(_) => StatusCode::BAD_GATEWAY,
        GatewayError::QueryError { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        GatewayError::NotConfigured => StatusCode::NOT_IMPLEMENTED,
    };
    let message = match &err {
        GatewayError::GatewayNotConnected { detail: Some(detail), .. } => format!("{err}: {detail}"),
        _ => err.to_string(),
    };
    (status, message)
}
