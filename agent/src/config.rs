//! # Config Loader
//!
//! Layered configuration: environment variables override a TOML file which
//! overrides built-in defaults, mirroring the three-tier precedence the
//! original Python agent's `config.py::load_config` implements over
//! YAML/JSON. Env vars are prefixed `GATEWAY_AGENT_` with `__` separating
//! nested keys (e.g. `GATEWAY_AGENT_DATABASE__HOST`).

use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GatewayTransportConfig {
    pub saas_url: String,
    pub gateway_token: String,
    pub heartbeat_interval: u64,
    pub reconnect_delay: u64,
    pub max_reconnect_attempts: u32,
    pub ssl_verify: bool,
}

impl Default for GatewayTransportConfig {
    fn default() -> Self {
        Self {
            saas_url: "wss://gateway.example.com/ws".to_string(),
            gateway_token: String::new(),
            heartbeat_interval: 30,
            reconnect_delay: 5,
            max_reconnect_attempts: 0,
            ssl_verify: true,
        }
    }
}

impl GatewayTransportConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub driver: String,
    pub use_windows_auth: bool,
    pub connection_timeout: u64,
    pub query_timeout: u64,
    pub trust_server_certificate: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1433,
            database: String::new(),
            username: String::new(),
            password: String::new(),
            driver: "ODBC Driver 18 for SQL Server".to_string(),
            use_windows_auth: false,
            connection_timeout: 30,
            query_timeout: 60,
            trust_server_certificate: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmployeeSchemaConfig {
    pub employee_table: String,
    pub code_column: String,
    pub name_column: String,
    pub card_table: String,
    pub card_column: String,
}

impl Default for EmployeeSchemaConfig {
    fn default() -> Self {
        Self {
            employee_table: "EmployeeMaster".to_string(),
            code_column: "CorpEmpCode".to_string(),
            name_column: "EmpName".to_string(),
            card_table: "Employee_Card_Relation".to_string(),
            card_column: "CardNo".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub bearer_token: Option<String>,
    pub default_timeout: u64,
    pub verify_ssl: bool,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key: None,
            bearer_token: None,
            default_timeout: 30,
            verify_ssl: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
    pub max_size_mb: u64,
    pub backup_count: u32,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: Some("gateway-agent.log".to_string()),
            max_size_mb: 10,
            backup_count: 5,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Bounds how many local executor invocations (SQL, HTTP, employee
    /// lookup combined) may run concurrently. The original's asyncio event
    /// loop had no explicit bound beyond the OS; this caps it.
    pub max_concurrent_requests: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 16,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub gateway: GatewayTransportConfig,
    pub database: DatabaseConfig,
    pub employee_schema: EmployeeSchemaConfig,
    pub http: HttpConfig,
    pub logging: LoggingConfig,
    pub executor: ExecutorConfig,
}

impl AgentConfig {
    /// Loads configuration with precedence env > file > defaults.
    ///
    /// `config_path` defaults to `config.toml` in the current directory if
    /// not overridden by `GATEWAY_AGENT_CONFIG_PATH`; a missing file is not
    /// an error, the same way the original tolerated an absent YAML file.
    pub fn load(config_path: Option<&str>) -> Result<Self, config::ConfigError> {
        let path = config_path
            .map(str::to_string)
            .or_else(|| std::env::var("GATEWAY_AGENT_CONFIG_PATH").ok())
            .unwrap_or_else(|| "config.toml".to_string());

        let builder = config::Config::builder()
            .add_source(config::File::with_name(&path).required(false))
            .add_source(
                config::Environment::with_prefix("GATEWAY_AGENT")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_any_file_or_env() {
        let config = AgentConfig::load(Some("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(config.gateway.heartbeat_interval, 30);
        assert_eq!(config.database.port, 1433);
        assert_eq!(config.executor.max_concurrent_requests, 16);
    }

    #[test]
    fn env_override_takes_precedence_over_defaults() {
        std::env::set_var("GATEWAY_AGENT_DATABASE__HOST", "db.internal");
        let config = AgentConfig::load(Some("/nonexistent/path/config.toml")).unwrap();
        assert_eq!(config.database.host, "db.internal");
        std::env::remove_var("GATEWAY_AGENT_DATABASE__HOST");
    }
}
