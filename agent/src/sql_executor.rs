//! # SQL Executor
//!
//! Opens or reuses one connection to the local database and answers
//! `QUERY_REQUEST` frames. Generalized from `database.py::LocalDatabaseManager`,
//! ported from `pyodbc` to `tiberius` (this ecosystem's pure-Rust async
//! SQL Server driver) since no ODBC driver manager is assumed to be present
//! on the host.

use crate::config::DatabaseConfig;
use crate::sql_value::column_to_json;
use gateway_protocol::GatewayError;
use std::collections::HashMap;
use std::time::Duration;
use tiberius::{AuthMethod, Client, Config};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout as tokio_timeout;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{info, warn};

type SqlClient = Client<Compat<TcpStream>>;

pub struct QueryOutcome {
    pub columns: Vec<String>,
    pub rows: Vec<HashMap<String, serde_json::Value>>,
    pub row_count: u64,
    pub execution_time_ms: u64,
}

/// Holds at most one live connection, reconnecting on demand. A query
/// failure that looks connection-related drops the cached client so the
/// next call reconnects instead of repeating the same broken socket.
pub struct SqlExecutor {
    config: DatabaseConfig,
    client: Mutex<Option<SqlClient>>,
}

impl SqlExecutor {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            client: Mutex::new(None),
        }
    }

    fn tiberius_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        if self.config.use_windows_auth {
            config.authentication(AuthMethod::Integrated);
        } else {
            config.authentication(AuthMethod::sql_server(&self.config.username, &self.config.password));
        }
        if self.config.trust_server_certificate {
            config.trust_cert();
        }
        config
    }

    async fn dial(&self) -> Result<SqlClient, GatewayError> {
        let tiberius_config = self.tiberius_config();
        let connect_timeout = Duration::from_secs(self.config.connection_timeout);

        let tcp = tokio_timeout(connect_timeout, TcpStream::connect(tiberius_config.get_addr()))
            .await
            .map_err(|_| GatewayError::QueryError {
                message: "connection timed out".into(),
                error_code: Some("CONNECTION_ERROR".into()),
            })?
            .map_err(|e| GatewayError::QueryError {
                message: format!("tcp connect failed: {e}"),
                error_code: Some("CONNECTION_ERROR".into()),
            })?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(tiberius_config, tcp.compat_write())
            .await
            .map_err(|e| GatewayError::QueryError {
                message: format!("sql handshake failed: {e}"),
                error_code: Some("CONNECTION_ERROR".into()),
            })?;
        info!(database = %self.config.database, "connected to local database");
        Ok(client)
    }

    async fn borrow_client(&self) -> Result<tokio::sync::MutexGuard<'_, Option<SqlClient>>, GatewayError> {
        let mut guard = self.client.lock().await;
        if guard.is_none() {
            *guard = Some(self.dial().await?);
        }
        Ok(guard)
    }

    pub async fn is_connected(&self) -> bool {
        let mut guard = self.client.lock().await;
        let Some(client) = guard.as_mut() else { return false };
        client.simple_query("SELECT 1").await.is_ok()
    }

    /// Runs `sql` with the given per-request timeout, capping returned rows
    /// at `max_rows`. Non-`SELECT` statements (no result set) report zero
    /// rows, mirroring the original's `affected_rows` branch.
    pub async fn execute_query(&self, sql: &str, timeout: Duration, max_rows: u32) -> Result<QueryOutcome, GatewayError> {
        let start = std::time::Instant::now();
        let mut guard = self.borrow_client().await?;
        let client = guard.as_mut().expect("just ensured present");

        let query_result = tokio_timeout(timeout, client.simple_query(sql)).await;
        let stream = match query_result {
            Err(_) => return Err(GatewayError::Timeout(timeout.as_secs())),
            Ok(Err(e)) => {
                *guard = None;
                return Err(GatewayError::QueryError {
                    message: e.to_string(),
                    error_code: None,
                });
            }
            Ok(Ok(stream)) => stream,
        };

        let result_set = stream.into_first_result().await.map_err(|e| GatewayError::QueryError {
            message: e.to_string(),
            error_code: None,
        })?;

        let mut columns = Vec::new();
        let mut rows = Vec::new();
        for row in result_set.into_iter().take(max_rows as usize) {
            if columns.is_empty() {
                columns = row.columns().iter().map(|c| c.name().to_string()).collect();
            }
            let mut record = HashMap::new();
            for (idx, col) in row.columns().iter().enumerate() {
                record.insert(col.name().to_string(), column_to_json(&row, idx));
            }
            rows.push(record);
        }

        Ok(QueryOutcome {
            row_count: rows.len() as u64,
            columns,
            rows,
            execution_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Runs a parameterized query (`@P1`, `@P2`, ... placeholders) and
    /// returns raw rows without a row cap — used by the employee-lookup
    /// executor, which bounds result size itself (`TOP 5` in its partial
    /// match query).
    pub async fn query_params(
        &self,
        sql: &str,
        params: &[&str],
        timeout: Duration,
    ) -> Result<Vec<HashMap<String, serde_json::Value>>, GatewayError> {
        let mut guard = self.borrow_client().await?;
        let client = guard.as_mut().expect("just ensured present");

        let param_refs: Vec<&dyn tiberius::ToSql> = params.iter().map(|p| p as &dyn tiberius::ToSql).collect();
        let query_result = tokio_timeout(timeout, client.query(sql, &param_refs)).await;
        let stream = match query_result {
            Err(_) => return Err(GatewayError::Timeout(timeout.as_secs())),
            Ok(Err(e)) => {
                *guard = None;
                return Err(GatewayError::QueryError {
                    message: e.to_string(),
                    error_code: None,
                });
            }
            Ok(Ok(stream)) => stream,
        };

        let result_set = stream.into_first_result().await.map_err(|e| GatewayError::QueryError {
            message: e.to_string(),
            error_code: None,
        })?;

        let mut rows = Vec::with_capacity(result_set.len());
        for row in &result_set {
            let mut record = HashMap::new();
            for (idx, col) in row.columns().iter().enumerate() {
                record.insert(col.name().to_string(), column_to_json(row, idx));
            }
            rows.push(record);
        }
        Ok(rows)
    }
}

pub fn classify_connection_failure(err: &GatewayError) -> bool {
    matches!(err, GatewayError::QueryError { error_code: Some(code), .. } if code == "CONNECTION_ERROR")
}

#[allow(dead_code)]
fn log_dial_failure(config: &DatabaseConfig, err: &GatewayError) {
    warn!(host = %config.host, database = %config.database, error = %err, "local database connect failed");
}
