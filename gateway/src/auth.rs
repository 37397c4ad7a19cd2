//! # Authenticator
//!
//! Resolves an agent's handshake credential to the database it speaks for.
//! The real lookup (a hashed-token table, an identity provider, whatever the
//! deployment uses) is an external collaborator injected at startup — this
//! module only defines the seam and ships an in-memory reference
//! implementation for tests and local development.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct AuthResolution {
    pub database_id: String,
    pub database_name: String,
    pub tenant_id: Option<String>,
}

/// Why a handshake credential was rejected. Distinct from a generic string so
/// callers can map each case to the wire `AuthStatus` variant it corresponds
/// to (`TokenExpired`/`TokenRevoked` are recoverable by re-provisioning a
/// credential; neither is the same failure as an unrecognized token).
#[derive(Debug, Clone)]
pub enum AuthRejection {
    /// Token is malformed, unknown, or otherwise never valid.
    Invalid(String),
    /// Token was valid but its expiry has passed.
    Expired(String),
    /// Token was valid but has since been revoked.
    Revoked(String),
}

impl std::fmt::Display for AuthRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthRejection::Invalid(msg) | AuthRejection::Expired(msg) | AuthRejection::Revoked(msg) => {
                write!(f, "{msg}")
            }
        }
    }
}

/// Validates an agent's bearer token and resolves it to the database it is
/// authorized to tunnel for. Implementations must be safe to call
/// concurrently from many connection tasks at once and must be idempotent —
/// authenticating the same token twice must not have side effects beyond
/// bookkeeping (e.g. updating a last-used timestamp).
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn authenticate(&self, gateway_token: &str) -> Result<AuthResolution, AuthRejection>;
}

struct TokenRecord {
    database_id: String,
    database_name: String,
    tenant_id: Option<String>,
    revoked: bool,
    expires_at: Option<chrono::DateTime<chrono::Utc>>,
}

/// Reference authenticator backed by a process-local token table. Good
/// enough for local development and integration tests; production
/// deployments are expected to supply their own [`Authenticator`] backed by
/// whatever credential store they already run.
pub struct StaticTokenAuthenticator {
    tokens: RwLock<HashMap<String, TokenRecord>>,
}

impl StaticTokenAuthenticator {
    pub fn new() -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, token: impl Into<String>, database_id: impl Into<String>, database_name: impl Into<String>, tenant_id: Option<String>) {
        self.register_with_expiry(token, database_id, database_name, tenant_id, None).await;
    }

    pub async fn register_with_expiry(
        &self,
        token: impl Into<String>,
        database_id: impl Into<String>,
        database_name: impl Into<String>,
        tenant_id: Option<String>,
        expires_at: Option<chrono::DateTime<chrono::Utc>>,
    ) {
        self.tokens.write().await.insert(
            token.into(),
            TokenRecord {
                database_id: database_id.into(),
                database_name: database_name.into(),
                tenant_id,
                revoked: false,
                expires_at,
            },
        );
    }

    pub async fn revoke(&self, token: &str) {
        if let Some(record) = self.tokens.write().await.get_mut(token) {
            record.revoked = true;
        }
    }
}

impl Default for StaticTokenAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, gateway_token: &str) -> Result<AuthResolution, AuthRejection> {
        let tokens = self.tokens.read().await;
        match tokens.get(gateway_token) {
            Some(record) if record.revoked => Err(AuthRejection::Revoked("token revoked".to_string())),
            Some(record) if record.expires_at.is_some_and(|exp| exp <= chrono::Utc::now()) => {
                Err(AuthRejection::Expired("token expired".to_string()))
            }
            Some(record) => Ok(AuthResolution {
                database_id: record.database_id.clone(),
                database_name: record.database_name.clone(),
                tenant_id: record.tenant_id.clone(),
            }),
            None => Err(AuthRejection::Invalid("unknown gateway token".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_token_is_rejected_as_invalid() {
        let auth = StaticTokenAuthenticator::new();
        match auth.authenticate("gw_nope").await.unwrap_err() {
            AuthRejection::Invalid(msg) => assert!(msg.contains("unknown")),
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registered_token_resolves_to_its_database() {
        let auth = StaticTokenAuthenticator::new();
        auth.register("gw_abc", "db-1", "Acme Prod", Some("tenant-1".into())).await;
        let resolution = auth.authenticate("gw_abc").await.unwrap();
        assert_eq!(resolution.database_id, "db-1");
        assert_eq!(resolution.tenant_id.as_deref(), Some("tenant-1"));
    }

    #[tokio::test]
    async fn revoked_token_is_rejected_as_revoked() {
        let auth = StaticTokenAuthenticator::new();
        auth.register("gw_abc", "db-1", "Acme Prod", None).await;
        auth.revoke("gw_abc").await;
        match auth.authenticate("gw_abc").await.unwrap_err() {
            AuthRejection::Revoked(msg) => assert!(msg.contains("revoked")),
            other => panic!("expected Revoked, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn expired_token_is_rejected_as_expired() {
        let auth = StaticTokenAuthenticator::new();
        let expired = chrono::Utc::now() - chrono::Duration::seconds(60);
        auth.register_with_expiry("gw_abc", "db-1", "Acme Prod", None, Some(expired)).await;
        match auth.authenticate("gw_abc").await.unwrap_err() {
            AuthRejection::Expired(msg) => assert!(msg.contains("expired")),
            other => panic!("expected Expired, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn future_expiry_still_authenticates() {
        let auth = StaticTokenAuthenticator::new();
        let not_yet = chrono::Utc::now() + chrono::Duration::seconds(60);
        auth.register_with_expiry("gw_abc", "db-1", "Acme Prod", None, Some(not_yet)).await;
        assert!(auth.authenticate("gw_abc").await.is_ok());
    }
}
