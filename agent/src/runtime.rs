//! # Agent Runtime State
//!
//! Counters and health status shared between the connection loop (which
//! reports them in heartbeats) and the executors (which update them as they
//! run). Mirrors the bookkeeping `GatewayConnection` keeps inline in the
//! original (`_queries_executed`, `_start_time`) plus the analogous API
//! counter the original omitted from its heartbeat payload but the spec's
//! `api_requests_executed` field requires.

use gateway_protocol::DbStatus;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;

pub struct AgentRuntime {
    started_at: Instant,
    queries_executed: AtomicU64,
    api_requests_executed: AtomicU64,
    db_status: RwLock<DbStatus>,
    api_status: RwLock<DbStatus>,
}

impl AgentRuntime {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            queries_executed: AtomicU64::new(0),
            api_requests_executed: AtomicU64::new(0),
            db_status: RwLock::new(DbStatus::Disconnected),
            api_status: RwLock::new(DbStatus::Disconnected),
        }
    }

    pub fn record_query(&self) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_request(&self) {
        self.api_requests_executed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queries_executed(&self) -> u64 {
        self.queries_executed.load(Ordering::Relaxed)
    }

    pub fn api_requests_executed(&self) -> u64 {
        self.api_requests_executed.load(Ordering::Relaxed)
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    pub async fn set_db_status(&self, status: DbStatus) {
        *self.db_status.write().await = status;
    }

    pub async fn set_api_status(&self, status: DbStatus) {
        *self.api_status.write().await = status;
    }

    pub async fn db_status(&self) -> DbStatus {
        *self.db_status.read().await
    }

    pub async fn api_status(&self) -> DbStatus {
        *self.api_status.read().await
    }
}

impl Default for AgentRuntime {
    fn default() -> Self {
        Self::new()
    }
}
