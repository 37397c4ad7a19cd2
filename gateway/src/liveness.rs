//! # Liveness Monitor
//!
//! Periodically sweeps the session registry for sessions whose heartbeat
//! has gone quiet, terminates them, and removes them from the registry.
//! Pending requests on a stale session are completed with
//! `CONNECTION_CLOSED` as part of termination, not while any registry-wide
//! state is locked.

use crate::registry::SessionRegistry;
use std::time::Duration;
use tracing::info;

pub fn spawn(registry: SessionRegistry, stale_after: Duration, sweep_interval: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        loop {
            ticker.tick().await;
            let stale = registry.stale_sessions(stale_after).await;
            for session in stale {
                info!(
                    session_id = %session.session_id,
                    database_id = %session.database_id,
                    "liveness monitor expiring stale session"
                );
                session.terminate();
                registry.remove(&session.session_id);
            }
        }
    });
}
