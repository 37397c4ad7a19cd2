//! # Query Router
//!
//! Chooses between the tunnel path and the direct-connect path for a given
//! database, following the same decision table the original router used:
//! `gateway_only` and `direct_only` are forced, `auto` prefers the tunnel
//! when a fresh session exists and otherwise falls back to a direct probe.

use crate::direct::DirectExecutor;
use crate::registry::SessionRegistry;
use dashmap::DashMap;
use gateway_protocol::GatewayError;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    Auto,
    GatewayOnly,
    DirectOnly,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectiveMethod {
    Gateway,
    Direct,
    None,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub database_id: String,
    pub database_name: String,
    pub connection_mode: ConnectionMode,
    pub gateway_connected: bool,
    pub gateway_session_id: Option<String>,
    pub direct_status: DirectStatus,
    pub effective_method: EffectiveMethod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectStatus {
    Reachable,
    Unreachable,
    Unknown,
}

struct ProbeCacheEntry {
    reachable: bool,
    error_detail: Option<String>,
    checked_at: Instant,
}

/// Caches `auto`-mode direct-reachability probes for a short window so a
/// burst of queries against the same database doesn't re-probe on every
/// call.
const PROBE_CACHE_TTL: Duration = Duration::from_secs(1);
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct QueryRouter {
    registry: SessionRegistry,
    direct: Arc<DirectExecutor>,
    stale_after: Duration,
    probe_cache: DashMap<String, ProbeCacheEntry>,
}

impl QueryRouter {
    pub fn new(registry: SessionRegistry, direct: Arc<DirectExecutor>, stale_after: Duration) -> Self {
        Self {
            registry,
            direct,
            stale_after,
            probe_cache: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn direct(&self) -> &DirectExecutor {
        &self.direct
    }

    /// The active, non-stale session for `database_id`, if any, using this
    /// router's own staleness threshold.
    pub async fn active_session(&self, database_id: &str) -> Option<Arc<crate::session::Session>> {
        self.registry.lookup(database_id, self.stale_after).await
    }

    /// Decide whether `database_id` should be reached through the tunnel
    /// for this call, given its configured `mode`.
    pub async fn should_use_gateway(&self, database_id: &str, mode: ConnectionMode) -> Result<bool, GatewayError> {
        match mode {
            ConnectionMode::GatewayOnly => {
                if self.registry.lookup(database_id, self.stale_after).await.is_some() {
                    Ok(true)
                } else {
                    Err(GatewayError::GatewayNotConnected {
                        database_id: database_id.to_string(),
                        detail: None,
                    })
                }
            }
            ConnectionMode::DirectOnly => Ok(false),
            ConnectionMode::Auto => {
                if self.registry.lookup(database_id, self.stale_after).await.is_some() {
                    return Ok(true);
                }
                let (reachable, detail) = self.probe_direct(database_id).await;
                if reachable {
                    Ok(false)
                } else {
                    Err(GatewayError::GatewayNotConnected {
                        database_id: database_id.to_string(),
                        detail,
                    })
                }
            }
        }
    }

    /// Probes direct reachability, returning whether the database answered
    /// and, when it didn't, the probe failure's detail so callers can
    /// surface it alongside `GATEWAY_NOT_CONNECTED`.
    async fn probe_direct(&self, database_id: &str) -> (bool, Option<String>) {
        if let Some(entry) = self.probe_cache.get(database_id) {
            if entry.checked_at.elapsed() < PROBE_CACHE_TTL {
                return (entry.reachable, entry.error_detail.clone());
            }
        }
        let (reachable, error_detail) = match tokio::time::timeout(PROBE_TIMEOUT, self.direct.test_connection(database_id)).await {
            Ok(Ok(())) => (true, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some(format!("direct probe timed out after {}s", PROBE_TIMEOUT.as_secs()))),
        };
        self.probe_cache.insert(
            database_id.to_string(),
            ProbeCacheEntry {
                reachable,
                error_detail: error_detail.clone(),
                checked_at: Instant::now(),
            },
        );
        (reachable, error_detail)
    }

    pub async fn connection_status(
        &self,
        database_id: &str,
        database_name: &str,
        mode: ConnectionMode,
    ) -> ConnectionStatus {
        let session = self.registry.lookup(database_id, self.stale_after).await;
        let gateway_connected = session.is_some();
        let gateway_session_id = session.map(|s| s.session_id.clone());

        let direct_status = if matches!(mode, ConnectionMode::GatewayOnly) && gateway_connected {
            DirectStatus::Unknown
        } else if self.probe_direct(database_id).await.0 {
            DirectStatus::Reachable
        } else {
            DirectStatus::Unreachable
        };

        let effective_method = match mode {
            ConnectionMode::GatewayOnly if gateway_connected => EffectiveMethod::Gateway,
            ConnectionMode::GatewayOnly => EffectiveMethod::None,
            ConnectionMode::DirectOnly if direct_status == DirectStatus::Reachable => EffectiveMethod::Direct,
            ConnectionMode::DirectOnly => EffectiveMethod::None,
            ConnectionMode::Auto if gateway_connected => EffectiveMethod::Gateway,
            ConnectionMode::Auto if direct_status == DirectStatus::Reachable => EffectiveMethod::Direct,
            ConnectionMode::Auto => EffectiveMethod::None,
        };

        ConnectionStatus {
            database_id: database_id.to_string(),
            database_name: database_name.to_string(),
            connection_mode: mode,
            gateway_connected,
            gateway_session_id,
            direct_status,
            effective_method,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;

    fn test_session(session_id: &str, database_id: &str) -> Arc<Session> {
        let (tx, _rx) = tokio::sync::mpsc::channel(8);
        Arc::new(Session::new(
            session_id.to_string(),
            database_id.to_string(),
            "Test DB".to_string(),
            None,
            "1.0.0".to_string(),
            None,
            None,
            tx,
        ))
    }

    fn router() -> QueryRouter {
        QueryRouter::new(SessionRegistry::new(), Arc::new(DirectExecutor::new()), Duration::from_secs(90))
    }

    #[tokio::test]
    async fn gateway_only_uses_the_tunnel_when_a_session_is_present() {
        let router = router();
        router.registry().install(test_session("s1", "db-1"));

        let use_gateway = router
            .should_use_gateway("db-1", ConnectionMode::GatewayOnly)
            .await
            .expect("session is present");
        assert!(use_gateway);
    }

    #[tokio::test]
    async fn gateway_only_fails_without_a_session() {
        let router = router();

        let err = router
            .should_use_gateway("db-1", ConnectionMode::GatewayOnly)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::GatewayNotConnected { .. }));
    }

    #[tokio::test]
    async fn direct_only_never_consults_the_registry() {
        let router = router();
        router.registry().install(test_session("s1", "db-1"));

        let use_gateway = router
            .should_use_gateway("db-1", ConnectionMode::DirectOnly)
            .await
            .expect("direct_only never errors on its own");
        assert!(!use_gateway, "direct_only must never route through the tunnel");
    }

    #[tokio::test]
    async fn auto_prefers_the_tunnel_when_a_session_is_present() {
        let router = router();
        router.registry().install(test_session("s1", "db-1"));

        let use_gateway = router
            .should_use_gateway("db-1", ConnectionMode::Auto)
            .await
            .expect("session is present");
        assert!(use_gateway);
    }

    #[tokio::test]
    async fn auto_fails_with_probe_detail_when_nothing_is_reachable() {
        let router = router();

        let err = router.should_use_gateway("db-1", ConnectionMode::Auto).await.unwrap_err();
        match err {
            GatewayError::GatewayNotConnected { database_id, detail } => {
                assert_eq!(database_id, "db-1");
                assert!(detail.is_some(), "auto-mode failure should carry the probe's detail");
            }
            other => panic!("expected GatewayNotConnected, got {other:?}"),
        }
    }
}
