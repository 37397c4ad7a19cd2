use thiserror::Error;

/// Error kinds surfaced by the gateway's synchronous API.
///
/// Mirrors the taxonomy the original gateway's exception hierarchy
/// collapsed to a handful of client-visible reasons.
#[derive(Debug, Error, Clone)]
pub enum GatewayError {
    #[error("agent authentication failed: {0}")]
    AuthFailed(String),

    #[error("no active tunnel session for database {database_id}")]
    GatewayNotConnected {
        database_id: String,
        detail: Option<String>,
    },

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error("tunnel session closed while request was in flight")]
    ConnectionClosed,

    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("query failed: {message}")]
    QueryError {
        message: String,
        error_code: Option<String>,
    },

    #[error("local endpoint not configured")]
    NotConfigured,
}

impl GatewayError {
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::AuthFailed(_) => "AUTH_FAILED",
            GatewayError::GatewayNotConnected { .. } => "GATEWAY_NOT_CONNECTED",
            GatewayError::Timeout(_) => "TIMEOUT",
            GatewayError::ConnectionClosed => "CONNECTION_CLOSED",
            GatewayError::ProtocolError(_) => "PROTOCOL_ERROR",
            GatewayError::QueryError { .. } => "QUERY_ERROR",
            GatewayError::NotConfigured => "NOT_CONFIGURED",
        }
    }
}
