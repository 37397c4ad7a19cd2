//! # Session Registry
//!
//! Single source of truth for which database is reachable through which
//! tunnel session. Uses [`DashMap`] for lock-free concurrent access, the
//! same choice the relay's original agent/connection registries made.

use crate::session::{Session, SessionSnapshot};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Clone, Default)]
pub struct SessionRegistry {
    by_database: Arc<DashMap<String, Arc<Session>>>,
    session_to_database: Arc<DashMap<String, String>>,
}

impl SessionRegistry {
    /// A fresh, empty registry. Not a process-wide singleton — callers own
    /// one instance (the gateway binary builds exactly one at startup; tests
    /// build their own so they never share state with each other).
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `session`, atomically superseding any existing active
    /// session for the same `database_id`. The old session (if any) is
    /// marked inactive and its pending requests are failed before the new
    /// session becomes visible to lookups.
    pub fn install(&self, session: Arc<Session>) {
        let database_id = session.database_id.clone();
        if let Some((_, old)) = self.by_database.remove(&database_id) {
            info!(database_id = %database_id, old_session = %old.session_id, new_session = %session.session_id, "superseding existing session");
            old.terminate();
            self.session_to_database.remove(&old.session_id);
        }
        self.session_to_database
            .insert(session.session_id.clone(), database_id.clone());
        self.by_database.insert(database_id, session);
    }

    /// The active session for `database_id`, or `None` if absent or stale.
    /// Staleness here is a point-in-time check against the liveness
    /// threshold; the authoritative removal still happens in the liveness
    /// monitor's sweep, so a lookup that races a sweep in progress safely
    /// returns `None` either way.
    pub async fn lookup(&self, database_id: &str, stale_after: Duration) -> Option<Arc<Session>> {
        let session = self.by_database.get(database_id)?.clone();
        if !session.is_active() || session.is_stale(stale_after).await {
            return None;
        }
        Some(session)
    }

    pub fn lookup_by_session_id(&self, session_id: &str) -> Option<Arc<Session>> {
        let database_id = self.session_to_database.get(session_id)?.clone();
        self.by_database.get(&database_id).map(|e| e.clone())
    }

    /// Remove a session by its id. Idempotent: removing an absent id is a
    /// no-op, not an error.
    pub fn remove(&self, session_id: &str) {
        if let Some((_, database_id)) = self.session_to_database.remove(session_id) {
            self.by_database
                .remove_if(&database_id, |_, s| s.session_id == session_id);
        }
    }

    /// All sessions whose last heartbeat predates `stale_after`. Used by the
    /// liveness monitor; callers are expected to terminate and remove each
    /// one without holding any registry-wide lock while doing so (`DashMap`
    /// has none to hold in the first place, but the staged
    /// collect-then-act shape here keeps the sweep from blocking concurrent
    /// `install`/`lookup` calls any longer than the read pass itself).
    pub async fn stale_sessions(&self, stale_after: Duration) -> Vec<Arc<Session>> {
        let candidates: Vec<Arc<Session>> = self
            .by_database
            .iter()
            .filter(|e| e.is_active())
            .map(|e| e.value().clone())
            .collect();

        let mut stale = Vec::new();
        for session in candidates {
            if session.is_stale(stale_after).await {
                stale.push(session);
            }
        }
        stale
    }

    pub async fn snapshot(&self) -> Vec<SessionSnapshot> {
        let sessions: Vec<Arc<Session>> = self.by_database.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(sessions.len());
        for session in sessions {
            out.push(session.snapshot().await);
        }
        out
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

    #[tokio::test]
    async fn install_supersedes_existing_session_for_same_database() {
        let registry = SessionRegistry::new();
        let old = test_session("s1", "db-1");
        registry.install(old.clone());

        let new = test_session("s2", "db-1");
        registry.install(new.clone());

        assert!(!old.is_active(), "superseded session must be deactivated");
        let active = registry
            .lookup("db-1", Duration::from_secs(60))
            .await
            .expect("new session is installed");
        assert_eq!(active.session_id, "s2");
        assert!(registry.lookup_by_session_id("s1").is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let registry = SessionRegistry::new();
        let session = test_session("s1", "db-1");
        registry.install(session);

        registry.remove("s1");
        registry.remove("s1");

        assert!(registry.lookup("db-1", Duration::from_secs(60)).await.is_none());
    }

    #[tokio::test]
    async fn remove_of_unknown_session_is_a_no_op() {
        let registry = SessionRegistry::new();
        registry.remove("does-not-exist");
        assert!(registry.lookup("db-1", Duration::from_secs(60)).await.is_none());
    }

    #[tokio::test]
    async fn lookup_returns_none_once_heartbeat_goes_stale() {
        let registry = SessionRegistry::new();
        let session = test_session("s1", "db-1");
        registry.install(session);

        assert!(registry.lookup("db-1", Duration::from_millis(200)).await.is_some());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(registry.lookup("db-1", Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn stale_sessions_only_reports_sessions_past_the_threshold() {
        let registry = SessionRegistry::new();
        let fresh = test_session("s1", "db-1");
        registry.install(fresh);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let stale = test_session("s2", "db-2");
        registry.install(stale);

        let candidates = registry.stale_sessions(Duration::from_millis(10)).await;
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].session_id, "s1");
    }
}
