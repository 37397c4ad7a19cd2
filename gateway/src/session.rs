//! # Session
//!
//! A `Session` is the in-memory representation of one live agent tunnel. It
//! owns the outbound send queue, demultiplexes inbound frames by
//! `request_id`, and tracks the heartbeat-derived liveness state the
//! registry and liveness monitor act on.

use dashmap::DashMap;
use gateway_protocol::{DbStatus, Frame, GatewayError, RequestId, SessionId};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{oneshot, Mutex};
use tokio::time::timeout as tokio_timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Extra margin added on top of a caller-supplied timeout before the
/// correlator gives up waiting for a response. Covers round-trip overhead
/// the agent-side executor's own timeout doesn't account for.
const TIMEOUT_EPSILON: Duration = Duration::from_secs(5);

pub type OutboundTx = tokio::sync::mpsc::Sender<Frame>;

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub database_id: String,
    pub database_name: String,
    pub tenant_id: Option<String>,
    pub agent_version: String,
    pub agent_hostname: Option<String>,
    pub agent_os: Option<String>,
    pub connected_at: chrono::DateTime<chrono::Utc>,
    pub db_status: DbStatus,
    pub api_status: DbStatus,
    pub queries_executed: u64,
    pub api_requests_executed: u64,
    pub active: bool,
}

/// One live tunnel. Cheap to clone (wraps `Arc` internals); the registry and
/// the connection task that owns the socket share the same `Arc<Session>`.
pub struct Session {
    pub session_id: SessionId,
    pub database_id: String,
    pub database_name: String,
    pub tenant_id: Option<String>,
    pub agent_version: String,
    pub agent_hostname: Option<String>,
    pub agent_os: Option<String>,
    pub connected_at: chrono::DateTime<chrono::Utc>,

    outbound: OutboundTx,
    pending: DashMap<RequestId, oneshot::Sender<Frame>>,
    last_heartbeat: Mutex<Instant>,
    db_status: Mutex<DbStatus>,
    api_status: Mutex<DbStatus>,
    queries_executed: AtomicU64,
    api_requests_executed: AtomicU64,
    active: AtomicBool,
    shutdown: CancellationToken,
}

impl Session {
    pub fn new(
        session_id: SessionId,
        database_id: String,
        database_name: String,
        tenant_id: Option<String>,
        agent_version: String,
        agent_hostname: Option<String>,
        agent_os: Option<String>,
        outbound: OutboundTx,
    ) -> Self {
        Self {
            session_id,
            database_id,
            database_name,
            tenant_id,
            agent_version,
            agent_hostname,
            agent_os,
            connected_at: chrono::Utc::now(),
            outbound,
            pending: DashMap::new(),
            last_heartbeat: Mutex::new(Instant::now()),
            db_status: Mutex::new(DbStatus::Connected),
            api_status: Mutex::new(DbStatus::Connected),
            queries_executed: AtomicU64::new(0),
            api_requests_executed: AtomicU64::new(0),
            active: AtomicBool::new(true),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Resolves once `terminate()` has run. `handle_connection` selects on
    /// this alongside the inbound socket read so a session torn down by the
    /// liveness sweep or by a replacement agent actually gets its socket
    /// closed instead of leaving the read loop blocked forever.
    pub async fn terminated(&self) {
        self.shutdown.cancelled().await
    }

    /// Send a frame that does not expect a correlated response (e.g. an ack).
    pub async fn send(&self, frame: Frame) -> Result<(), GatewayError> {
        if !self.is_active() {
            return Err(GatewayError::ConnectionClosed);
        }
        self.outbound
            .send(frame)
            .await
            .map_err(|_| GatewayError::ConnectionClosed)
    }

    /// Send `frame` (which must already carry a fresh `request_id`) and wait
    /// for the matching response, or time out.
    ///
    /// The pending slot is a single-use `oneshot` channel: at most one
    /// response can ever complete it, and it is always removed on every
    /// terminal path (success, timeout, or session death) so no entry in
    /// `pending` survives past the request it belongs to.
    pub async fn request(&self, frame: Frame, timeout: Duration) -> Result<Frame, GatewayError> {
        let request_id = frame
            .request_id()
            .ok_or_else(|| GatewayError::ProtocolError("frame has no request_id".into()))?
            .to_string();

        if !self.is_active() {
            return Err(GatewayError::ConnectionClosed);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        if self.outbound.try_send(frame).is_err() {
            // Bounded queue saturated: fail fast rather than block the
            // caller's synchronous request.
            self.pending.remove(&request_id);
            return Err(GatewayError::ConnectionClosed);
        }

        let wait = timeout + TIMEOUT_EPSILON;
        match tokio_timeout(wait, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => {
                // Sender dropped without completing: session died mid-wait.
                self.pending.remove(&request_id);
                Err(GatewayError::ConnectionClosed)
            }
            Err(_) => {
                self.pending.remove(&request_id);
                Err(GatewayError::Timeout(timeout.as_secs()))
            }
        }
    }

    /// Complete a pending slot with an inbound response frame. Responses
    /// whose `request_id` has no matching slot (already timed out, or never
    /// requested) are logged and dropped, never treated as an error.
    pub fn complete(&self, frame: Frame) {
        let Some(request_id) = frame.request_id() else {
            return;
        };
        if let Some((_, tx)) = self.pending.remove(request_id) {
            let _ = tx.send(frame);
        } else {
            debug!(request_id, "response arrived for unknown or expired request");
        }
    }

    pub async fn record_heartbeat(&self, db_status: DbStatus, api_status: DbStatus, queries: u64, api_requests: u64) {
        *self.last_heartbeat.lock().await = Instant::now();
        *self.db_status.lock().await = db_status;
        *self.api_status.lock().await = api_status;
        self.queries_executed.store(queries, Ordering::Relaxed);
        self.api_requests_executed.store(api_requests, Ordering::Relaxed);
    }

    pub async fn update_db_status(&self, status: DbStatus) {
        *self.db_status.lock().await = status;
    }

    pub async fn is_stale(&self, stale_after: Duration) -> bool {
        self.last_heartbeat.lock().await.elapsed() > stale_after
    }

    /// Mark the session dead and complete every still-pending request with
    /// `CONNECTION_CLOSED`. Idempotent: calling this twice is harmless.
    pub fn terminate(&self) {
        if self.active.swap(false, Ordering::AcqRel) {
            warn!(session_id = %self.session_id, database_id = %self.database_id, "session terminated");
            self.shutdown.cancel();
        }
        let stale: Vec<RequestId> = self.pending.iter().map(|e| e.key().clone()).collect();
        for request_id in stale {
            if let Some((_, tx)) = self.pending.remove(&request_id) {
                let _ = tx.send(Frame::error(
                    Some(request_id),
                    GatewayError::ConnectionClosed.code(),
                    "tunnel session closed",
                ));
            }
        }
    }

    pub async fn snapshot(self: &Arc<Self>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            database_id: self.database_id.clone(),
            database_name: self.database_name.clone(),
            tenant_id: self.tenant_id.clone(),
            agent_version: self.agent_version.clone(),
            agent_hostname: self.agent_hostname.clone(),
            agent_os: self.agent_os.clone(),
            connected_at: self.connected_at,
            db_status: *self.db_status.lock().await,
            api_status: *self.api_status.lock().await,
            queries_executed: self.queries_executed.load(Ordering::Relaxed),
            api_requests_executed: self.api_requests_executed.load(Ordering::Relaxed),
            active: self.is_active(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> (Arc<Session>, tokio::sync::mpsc::Receiver<Frame>) {
        let (tx, rx) = tokio::sync::mpsc::channel(8);
        let session = Arc::new(Session::new(
            "sess-1".into(),
            "db-1".into(),
            "Test DB".into(),
            None,
            "1.0.0".into(),
            None,
            None,
            tx,
        ));
        (session, rx)
    }

    #[tokio::test]
    async fn terminate_completes_pending_requests_with_connection_closed() {
        let (session, _rx) = test_session();
        let (tx, rx) = oneshot::channel();
        session.pending.insert("req-1".into(), tx);

        session.terminate();

        match rx.await.expect("pending slot completed on terminate") {
            Frame::Error { error_code, request_id, .. } => {
                assert_eq!(error_code, GatewayError::ConnectionClosed.code());
                assert_eq!(request_id.as_deref(), Some("req-1"));
            }
            other => panic!("expected an error frame, got {other:?}"),
        }
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let (session, _rx) = test_session();
        session.terminate();
        session.terminate();
        assert!(!session.is_active());
    }

    #[tokio::test]
    async fn terminate_cancels_the_shutdown_token() {
        let (session, _rx) = test_session();
        session.terminate();
        tokio_timeout(Duration::from_millis(100), session.terminated())
            .await
            .expect("terminated() must resolve once terminate() has run");
    }

    #[tokio::test]
    async fn terminated_does_not_resolve_while_session_is_active() {
        let (session, _rx) = test_session();
        let result = tokio_timeout(Duration::from_millis(50), session.terminated()).await;
        assert!(result.is_err(), "terminated() resolved without a call to terminate()");
    }

    #[tokio::test(start_paused = true)]
    async fn request_times_out_when_no_response_arrives() {
        let (session, _rx) = test_session();
        let frame = Frame::QueryRequest {
            timestamp: chrono::Utc::now(),
            request_id: "req-2".into(),
            sql_query: "SELECT 1".into(),
            timeout: 1,
            max_rows: 10,
            user_id: None,
            conversation_id: None,
        };

        let waiter = {
            let session = session.clone();
            tokio::spawn(async move { session.request(frame, Duration::from_secs(1)).await })
        };
        tokio::time::advance(Duration::from_secs(7)).await;

        match waiter.await.expect("task did not panic") {
            Err(GatewayError::Timeout(secs)) => assert_eq!(secs, 1),
            other => panic!("expected a timeout error, got {other:?}"),
        }
        assert!(session.pending.is_empty(), "timed-out request_id must be evicted");
    }

    #[tokio::test]
    async fn is_stale_reports_true_once_the_threshold_elapses() {
        let (session, _rx) = test_session();
        assert!(!session.is_stale(Duration::from_secs(60)).await);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(session.is_stale(Duration::from_millis(10)).await);
    }

    #[tokio::test]
    async fn record_heartbeat_resets_staleness() {
        let (session, _rx) = test_session();
        tokio::time::sleep(Duration::from_millis(20)).await;
        session
            .record_heartbeat(DbStatus::Connected, DbStatus::Connected, 3, 1)
            .await;
        assert!(!session.is_stale(Duration::from_millis(10)).await);
    }
}
