//! Cloud-hosted side of the tunnel: accepts one long-lived WebSocket per
//! on-premises agent, authenticates it, and exposes a synchronous API the
//! rest of the platform uses to run SQL queries, call local HTTP APIs, and
//! look up employees through whichever agent owns that database.
//!
//! ## Modules
//!
//! - [`auth`] — pluggable handshake credential resolution
//! - [`session`] — one live tunnel: request/response correlation, heartbeats
//! - [`registry`] — which database maps to which live session
//! - [`liveness`] — expires sessions that stop heartbeating
//! - [`router`] — tunnel vs. direct-connect routing decision
//! - [`direct`] — cloud-side pooled connection path
//! - [`handlers`] — the WebSocket handshake/receive-loop state machine
//! - [`api`] — the synchronous API surface and its REST veneer

pub mod api;
pub mod auth;
pub mod config;
pub mod direct;
pub mod handlers;
pub mod liveness;
pub mod registry;
pub mod router;
pub mod session;
pub mod sql_value;
pub mod state;

use crate::api::{AppStateWithHandle, GatewayHandle};
use crate::auth::Authenticator;
use crate::config::GatewayConfig;
use crate::state::AppState;
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Assembles the full gateway router (tunnel WebSocket endpoint + the
/// synchronous API's REST veneer) given an already-constructed `AppState`.
/// Split out from `main` so integration tests can build the same router
/// against an in-process server.
pub fn build_app(state: AppState) -> Router {
    let handle = GatewayHandle::new(state.router.clone(), state.config.default_query_timeout);
    let with_handle = AppStateWithHandle {
        app: state.clone(),
        handle,
    };

    Router::new()
        .route("/ws", get(handlers::ws_handler))
        .with_state(state)
        .merge(api::routes().with_state(with_handle))
        .layer(CorsLayer::permissive())
}

pub fn new_state(authenticator: Arc<dyn Authenticator>, config: GatewayConfig) -> AppState {
    AppState::new(authenticator, config)
}
