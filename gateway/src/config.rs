//! # Gateway Configuration
//!
//! The gateway's own surface is intentionally small: a bind address and a
//! handful of timing constants. Everything interesting about *which*
//! databases exist and how they should be reached lives in whatever system
//! calls into [`crate::api::GatewayHandle`] — this struct only governs the
//! tunnel mechanics.

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub bind_addr: SocketAddr,
    /// How long an unauthenticated socket may sit in `AWAIT_AUTH` (T_auth).
    pub auth_timeout: Duration,
    /// Heartbeat cadence handed to agents during the handshake (H).
    pub heartbeat_interval: Duration,
    /// How long without a heartbeat before a session is declared stale (T_stale).
    pub stale_after: Duration,
    /// Default per-request timeout handed to agents during the handshake.
    pub default_query_timeout: Duration,
    /// How often the liveness monitor sweeps for stale sessions.
    pub liveness_sweep_interval: Duration,
}

impl GatewayConfig {
    pub fn from_env() -> Self {
        Self {
            bind_addr: env::var("GATEWAY_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 7070))),
            auth_timeout: Duration::from_secs(env_u64("GATEWAY_AUTH_TIMEOUT_SECS", 30)),
            heartbeat_interval: Duration::from_secs(env_u64("GATEWAY_HEARTBEAT_INTERVAL_SECS", 30)),
            stale_after: Duration::from_secs(env_u64("GATEWAY_STALE_AFTER_SECS", 90)),
            default_query_timeout: Duration::from_secs(env_u64("GATEWAY_DEFAULT_QUERY_TIMEOUT_SECS", 30)),
            liveness_sweep_interval: Duration::from_secs(env_u64("GATEWAY_LIVENESS_SWEEP_SECS", 15)),
        }
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
