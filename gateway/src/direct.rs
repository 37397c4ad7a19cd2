//! # Direct Executor
//!
//! The alternate, cloud-side path used when a database is configured for
//! `direct_only` routing or reachable as an `auto`-mode fallback: a pooled
//! connection opened straight from the gateway process to the customer
//! database, bypassing the tunnel entirely.

use deadpool::managed::{self, Metrics, Object, RecycleError, RecycleResult};
use gateway_protocol::GatewayError;
use std::collections::HashMap;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type SqlClient = Client<Compat<TcpStream>>;

/// Pools of four connections per database are plenty for the comparatively
/// rare `direct_only`/`auto`-fallback traffic this path serves; the tunnel
/// path carries the bulk of query volume.
const POOL_MAX_SIZE: usize = 4;

#[derive(Debug, Clone)]
pub struct DirectDbConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub trust_cert: bool,
}

impl DirectDbConfig {
    fn tiberius_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.host);
        config.port(self.port);
        config.database(&self.database);
        config.authentication(AuthMethod::sql_server(&self.username, &self.password));
        if self.trust_cert {
            config.trust_cert();
        }
        config
    }
}

/// [`deadpool::managed::Manager`] for tiberius connections: opens a fresh
/// TCP + SQL Server handshake on `create`, and checks a connection is still
/// alive with a trivial round-trip before handing it back out on `recycle`.
struct TiberiusManager {
    config: DirectDbConfig,
}

#[async_trait::async_trait]
impl managed::Manager for TiberiusManager {
    type Type = SqlClient;
    type Error = GatewayError;

    async fn create(&self) -> Result<Self::Type, Self::Error> {
        let tiberius_config = self.config.tiberius_config();
        let tcp = TcpStream::connect(tiberius_config.get_addr())
            .await
            .map_err(|e| GatewayError::QueryError {
                message: format!("direct connect failed: {e}"),
                error_code: Some("CONNECTION_ERROR".into()),
            })?;
        tcp.set_nodelay(true).ok();

        Client::connect(tiberius_config, tcp.compat_write())
            .await
            .map_err(|e| GatewayError::QueryError {
                message: format!("direct handshake failed: {e}"),
                error_code: Some("CONNECTION_ERROR".into()),
            })
    }

    async fn recycle(&self, client: &mut Self::Type, _: &Metrics) -> RecycleResult<Self::Error> {
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| RecycleError::Message(e.to_string().into()))?;
        Ok(())
    }
}

type TiberiusPool = managed::Pool<TiberiusManager>;

/// Registry of direct-connect credentials, keyed by `database_id`, each
/// backed by its own small connection pool so the rarely-used direct path
/// reuses live connections instead of repeating a fresh TCP handshake and
/// SQL Server login on every call.
pub struct DirectExecutor {
    pools: dashmap::DashMap<String, TiberiusPool>,
}

impl DirectExecutor {
    pub fn new() -> Self {
        Self {
            pools: dashmap::DashMap::new(),
        }
    }

    pub fn register(&self, database_id: impl Into<String>, config: DirectDbConfig) {
        let manager = TiberiusManager { config };
        let pool = managed::Pool::builder(manager)
            .max_size(POOL_MAX_SIZE)
            .build()
            .expect("pool builder only fails on invalid runtime config, which we don't set");
        self.pools.insert(database_id.into(), pool);
    }

    async fn checkout(&self, database_id: &str) -> Result<Object<TiberiusManager>, GatewayError> {
        let pool = {
            let entry = self.pools.get(database_id).ok_or_else(|| GatewayError::GatewayNotConnected {
                database_id: database_id.to_string(),
                detail: Some("no direct-connect credentials registered".to_string()),
            })?;
            entry.value().clone()
        };
        pool.get().await.map_err(|e| GatewayError::QueryError {
            message: format!("direct pool checkout failed: {e}"),
            error_code: Some("CONNECTION_ERROR".into()),
        })
    }

    /// Lightweight reachability probe used by the query router's `auto`
    /// fallback. Bounded by the caller's own timeout wrapper.
    pub async fn test_connection(&self, database_id: &str) -> Result<(), GatewayError> {
        let mut client = self.checkout(database_id).await?;
        client
            .simple_query("SELECT 1")
            .await
            .map_err(|e| GatewayError::QueryError {
                message: e.to_string(),
                error_code: Some("CONNECTION_ERROR".into()),
            })?;
        Ok(())
    }

    pub async fn execute_query(
        &self,
        database_id: &str,
        sql: &str,
        timeout: Duration,
        max_rows: u32,
    ) -> Result<(Vec<String>, Vec<HashMap<String, serde_json::Value>>), GatewayError> {
        let mut client = self.checkout(database_id).await?;
        let query = tokio::time::timeout(timeout, client.simple_query(sql))
            .await
            .map_err(|_| GatewayError::Timeout(timeout.as_secs()))?
            .map_err(|e| GatewayError::QueryError {
                message: e.to_string(),
                error_code: None,
            })?;

        let rows = query.into_first_result().await.map_err(|e| GatewayError::QueryError {
            message: e.to_string(),
            error_code: None,
        })?;

        let mut columns = Vec::new();
        let mut out = Vec::new();
        for row in rows.into_iter().take(max_rows as usize) {
            if columns.is_empty() {
                columns = row.columns().iter().map(|c| c.name().to_string()).collect();
            }
            let mut record = HashMap::new();
            for (idx, col) in row.columns().iter().enumerate() {
                record.insert(col.name().to_string(), crate::sql_value::column_to_json(&row, idx));
            }
            out.push(record);
        }
        Ok((columns, out))
    }
}

impl Default for DirectExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn checkout_fails_fast_for_an_unregistered_database() {
        let direct = DirectExecutor::new();
        let err = direct.test_connection("db-unknown").await.unwrap_err();
        match err {
            GatewayError::GatewayNotConnected { database_id, detail } => {
                assert_eq!(database_id, "db-unknown");
                assert!(detail.is_some());
            }
            other => panic!("expected GatewayNotConnected, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn register_creates_a_pool_without_connecting_eagerly() {
        let direct = DirectExecutor::new();
        direct.register(
            "db-1",
            DirectDbConfig {
                host: "db.invalid".to_string(),
                port: 1433,
                database: "acme".to_string(),
                username: "sa".to_string(),
                password: "secret".to_string(),
                trust_cert: true,
            },
        );
        // Registering must not itself dial out; the pool creates connections
        // lazily on first checkout.
        assert!(direct.pools.contains_key("db-1"));
    }
}
