//! Gateway binary entry point: wires up logging, the reference
//! authenticator, the liveness monitor, and the HTTP/WebSocket router, then
//! serves them.

use gateway::auth::{Authenticator, StaticTokenAuthenticator};
use gateway::config::GatewayConfig;
use gateway::{build_app, liveness, new_state};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "gateway=info".into()),
        )
        .init();

    let config = GatewayConfig::from_env();
    // The reference authenticator is adequate for local development; a real
    // deployment supplies its own `Authenticator` backed by whatever
    // credential store it already runs.
    let authenticator: Arc<dyn Authenticator> = Arc::new(StaticTokenAuthenticator::new());
    let state = new_state(authenticator, config.clone());

    liveness::spawn(state.registry.clone(), config.stale_after, config.liveness_sweep_interval);

    let app = build_app(state);

    info!("gateway listening on {}", config.bind_addr);
    let listener = tokio::net::TcpListener::bind(config.bind_addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
