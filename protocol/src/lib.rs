//! Wire protocol shared by the gateway and the on-prem agent.
//!
//! One JSON text frame per `Frame` value flows in each direction over the
//! tunnel socket. The enum is internally tagged on `type` so both ends can
//! decode without knowing the variant ahead of time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

mod error;
mod pending_action;
pub use error::GatewayError;
pub use pending_action::{PendingAction, PendingActionStatus};

pub type RequestId = String;
pub type SessionId = String;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frame {
    AuthRequest {
        timestamp: DateTime<Utc>,
        gateway_token: String,
        agent_version: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_hostname: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        agent_os: Option<String>,
    },
    AuthResponse {
        timestamp: DateTime<Utc>,
        status: AuthStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        #[serde(skip_serializing_if = "Option::is_none")]
        database_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        database_name: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        heartbeat_interval: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        query_timeout: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    QueryRequest {
        timestamp: DateTime<Utc>,
        request_id: RequestId,
        sql_query: String,
        timeout: u64,
        max_rows: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
    QueryResponse {
        timestamp: DateTime<Utc>,
        request_id: RequestId,
        status: QueryStatus,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        columns: Vec<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        rows: Vec<HashMap<String, serde_json::Value>>,
        #[serde(default)]
        row_count: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_time_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    ApiRequest {
        timestamp: DateTime<Utc>,
        request_id: RequestId,
        method: ApiMethod,
        endpoint: String,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
        #[serde(default)]
        query_params: HashMap<String, String>,
        timeout: u64,
    },
    ApiResponse {
        timestamp: DateTime<Utc>,
        request_id: RequestId,
        status: ApiStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(default)]
        headers: HashMap<String, String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        body: Option<serde_json::Value>,
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_time_ms: Option<u64>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    EmployeeLookupRequest {
        timestamp: DateTime<Utc>,
        request_id: RequestId,
        identifier: String,
        lookup_type: EmployeeLookupType,
        timeout: u64,
    },
    EmployeeLookupResponse {
        timestamp: DateTime<Utc>,
        request_id: RequestId,
        status: EmployeeLookupStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        employee: Option<HashMap<String, serde_json::Value>>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        employees: Vec<HashMap<String, serde_json::Value>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        execution_time_ms: Option<u64>,
    },
    Heartbeat {
        timestamp: DateTime<Utc>,
        session_id: SessionId,
        db_status: DbStatus,
        api_status: DbStatus,
        queries_executed: u64,
        api_requests_executed: u64,
        uptime_seconds: u64,
    },
    HeartbeatAck {
        timestamp: DateTime<Utc>,
        session_id: SessionId,
        server_time: DateTime<Utc>,
    },
    DbStatusUpdate {
        timestamp: DateTime<Utc>,
        session_id: SessionId,
        status: DbStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_message: Option<String>,
    },
    Error {
        timestamp: DateTime<Utc>,
        error_code: String,
        error_message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        request_id: Option<RequestId>,
    },
    Disconnect {
        timestamp: DateTime<Utc>,
        session_id: SessionId,
        reason: String,
    },
}

impl Frame {
    /// The `request_id` this frame correlates with, if it carries one.
    pub fn request_id(&self) -> Option<&str> {
        match self {
            Frame::QueryRequest { request_id, .. }
            | Frame::QueryResponse { request_id, .. }
            | Frame::ApiRequest { request_id, .. }
            | Frame::ApiResponse { request_id, .. }
            | Frame::EmployeeLookupRequest { request_id, .. }
            | Frame::EmployeeLookupResponse { request_id, .. } => Some(request_id),
            Frame::Error { request_id, .. } => request_id.as_deref(),
            _ => None,
        }
    }

    pub fn error(request_id: Option<RequestId>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Frame::Error {
            timestamp: Utc::now(),
            error_code: code.into(),
            error_message: message.into(),
            request_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthStatus {
    Success,
    Failed,
    TokenExpired,
    TokenRevoked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    Success,
    Error,
    Timeout,
    ConnectionError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ApiMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiStatus {
    Success,
    Error,
    Timeout,
    ConnectionError,
    NotConfigured,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeLookupType {
    Auto,
    Code,
    Name,
    Card,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmployeeLookupStatus {
    Success,
    NotFound,
    MultipleFound,
    Error,
    Timeout,
    ConnectionError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbStatus {
    Connected,
    Disconnected,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(frame: Frame) {
        let encoded = serde_json::to_string(&frame).expect("serialize");
        let decoded: Frame = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            serde_json::to_value(&decoded).unwrap()
        );
    }

    #[test]
    fn auth_request_roundtrips() {
        roundtrip(Frame::AuthRequest {
            timestamp: Utc::now(),
            gateway_token: "gw_abc123".into(),
            agent_version: "1.0.0".into(),
            agent_hostname: Some("site-01".into()),
            agent_os: Some("linux".into()),
        });
    }

    #[test]
    fn query_response_roundtrips_with_rows() {
        let mut row = HashMap::new();
        row.insert("x".to_string(), serde_json::json!(1));
        roundtrip(Frame::QueryResponse {
            timestamp: Utc::now(),
            request_id: "r1".into(),
            status: QueryStatus::Success,
            columns: vec!["x".into()],
            rows: vec![row],
            row_count: 1,
            execution_time_ms: Some(12),
            error_message: None,
            error_code: None,
        });
    }

    #[test]
    fn unknown_type_fails_to_decode_but_does_not_panic() {
        let raw = r#"{"type":"BOGUS","timestamp":"2024-01-01T00:00:00Z"}"#;
        let result: Result<Frame, _> = serde_json::from_str(raw);
        assert!(result.is_err());
    }

    #[test]
    fn request_id_extracts_from_correlated_variants() {
        let frame = Frame::ApiResponse {
            timestamp: Utc::now(),
            request_id: "abc".into(),
            status: ApiStatus::Success,
            status_code: Some(200),
            headers: HashMap::new(),
            body: None,
            execution_time_ms: Some(5),
            error_message: None,
            error_code: None,
        };
        assert_eq!(frame.request_id(), Some("abc"));
    }

    #[test]
    fn heartbeat_carries_no_request_id() {
        let frame = Frame::Heartbeat {
            timestamp: Utc::now(),
            session_id: "s1".into(),
            db_status: DbStatus::Connected,
            api_status: DbStatus::Connected,
            queries_executed: 0,
            api_requests_executed: 0,
            uptime_seconds: 0,
        };
        assert_eq!(frame.request_id(), None);
    }
}
