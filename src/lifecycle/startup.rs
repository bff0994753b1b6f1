//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (cache sweeper, snapshot writer, signals)
//! - Bind the listener and serve until shutdown

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;

use super::shutdown::Shutdown;
use super::signals;
use crate::cache::CacheBackendError;
use crate::config::GatewayConfig;
use crate::context::GatewayContext;
use crate::http::HttpServer;
use crate::observability::metrics;

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("cache initialization failed: {0}")]
    Cache(#[from] CacheBackendError),

    #[error("invalid metrics address `{0}`")]
    MetricsAddress(String),

    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the gateway with a validated config until a shutdown signal.
pub async fn run(config: GatewayConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr);
    }

    let ctx = GatewayContext::from_config(&config).await?;
    tracing::info!(
        backend = ctx.cache.stats().backend.backend,
        services = config.services.len(),
        "Gateway context initialized"
    );

    let shutdown = Shutdown::new();
    let mut tasks = vec![
        signals::spawn_signal_handler(shutdown.clone()),
        ctx.cache.spawn_sweeper(
            Duration::from_secs(config.cache.sweep_interval_secs),
            shutdown.subscribe(),
        ),
    ];
    if let Some(writer) = ctx.cache.spawn_snapshot_writer(
        Duration::from_secs(config.cache.snapshot_interval_secs),
        shutdown.subscribe(),
    ) {
        tasks.push(writer);
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let server = HttpServer::new(&config, ctx);
    let served = server.run(listener, shutdown.subscribe()).await;

    // Stop background tasks even when the server exited on its own.
    shutdown.trigger();
    let signal_task = tasks.remove(0);
    signal_task.abort();
    for result in futures_util::future::join_all(tasks).await {
        if let Err(e) = result {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    served?;
    tracing::info!("Shutdown complete");
    Ok(())
}
