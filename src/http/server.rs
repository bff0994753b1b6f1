//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the axum Router with health and admin handlers
//! - Wire up middleware (tracing, request timeout)
//! - Serve until the shutdown broadcast fires

use std::time::Duration;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin;
use crate::config::{AdminConfig, GatewayConfig};
use crate::context::GatewayContext;
use crate::health::handlers::{detailed_health, liveness};

/// Application state injected into handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub ctx: GatewayContext,
    pub admin: AdminConfig,
}

/// HTTP server for the gateway's operational endpoints.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(config: &GatewayConfig, ctx: GatewayContext) -> Self {
        let state = AppState {
            ctx,
            admin: config.admin.clone(),
        };
        let timeout = Duration::from_secs(config.listener.request_timeout_secs);
        Self {
            router: build_router(state, timeout),
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let mut router = Router::new()
        .route("/health", get(liveness))
        .route("/health/detailed", get(detailed_health));

    if state.admin.enabled {
        router = router.merge(admin::router(state.clone()));
    }

    router.with_state(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(request_timeout)),
    )
}
