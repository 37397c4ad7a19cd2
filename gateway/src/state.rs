//! # Shared Application State
//!
//! The Axum-facing handle passed to every route: the session registry, the
//! query router, the authenticator, and the gateway's own timing
//! configuration.

use crate::auth::Authenticator;
use crate::config::GatewayConfig;
use crate::direct::DirectExecutor;
use crate::registry::SessionRegistry;
use crate::router::QueryRouter;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub registry: SessionRegistry,
    pub router: Arc<QueryRouter>,
    pub authenticator: Arc<dyn Authenticator>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(authenticator: Arc<dyn Authenticator>, config: GatewayConfig) -> Self {
        let registry = SessionRegistry::new();
        let direct = Arc::new(DirectExecutor::new());
        let router = Arc::new(QueryRouter::new(registry.clone(), direct, config.stale_after));
        Self {
            registry,
            router,
            authenticator,
            config: Arc::new(config),
        }
    }
}
