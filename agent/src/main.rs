//! Agent binary entry point: loads configuration, wires up logging, and
//! runs the connection loop until a shutdown signal arrives. Replaces the
//! teacher's Tauri desktop shell with a plain CLI service process, matching
//! the original Python agent's `main.py` service entry point rather than
//! its GUI-adjacent `src-tauri` counterpart.

use agent::config::{AgentConfig, LoggingConfig};
use agent::connection::AgentConnection;
use std::sync::atomic::Ordering;
use tracing::info;

#[tokio::main]
async fn main() {
    let config = AgentConfig::load(None).expect("failed to load agent configuration");
    let _log_guard = init_logging(&config.logging);

    info!(saas_url = %config.gateway.saas_url, database = %config.database.database, "starting gateway agent");

    let connection = AgentConnection::new(config);
    let stop = connection.stop_handle();

    tokio::spawn(async move {
        wait_for_shutdown_signal().await;
        info!("shutdown signal received, stopping agent connection");
        stop.store(true, Ordering::Relaxed);
    });

    connection.run().await;
    info!("gateway agent stopped");
}

/// Stdout logging, or a daily-rolling file under `logging.file`'s directory
/// when configured. `max_size_mb`/`backup_count` describe a size-based
/// rotation the underlying appender crate doesn't offer; daily rotation is
/// the closest idiomatic equivalent and is what's wired up here.
fn init_logging(logging: &LoggingConfig) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(format!("agent={}", logging.level)));

    match &logging.file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let directory = path
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .unwrap_or_else(|| std::path::Path::new("."));
            let filename = path.file_name().and_then(|f| f.to_str()).unwrap_or("gateway-agent.log");

            let file_appender = tracing_appender::rolling::daily(directory, filename);
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt().with_env_filter(env_filter).with_writer(non_blocking).init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(env_filter).init();
            None
        }
    }
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
