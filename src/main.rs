//! Market data gateway.
//!
//! Serves token market data from rate-limited third-party providers through
//! a resilient-fetch core:
//!
//! ```text
//!     handler
//!        │
//!        ▼
//!   ┌─────────┐  hit   ┌──────────────────────────────┐
//!   │  cache  │──────▶ │ value (fresh or stale-on-err) │
//!   └────┬────┘        └──────────────────────────────┘
//!        │ miss (coalesced per key)
//!        ▼
//!   ┌──────────────┐ open  → CircuitBreakerError
//!   │   breaker    │
//!   └──────┬───────┘
//!          ▼
//!   ┌──────────────┐ full  → QueueFullError
//!   │ admission q  │ late  → QueueTimeoutError
//!   └──────┬───────┘
//!          ▼
//!     upstream provider
//! ```

use std::path::PathBuf;

use clap::Parser;

use market_gateway::config::{load_config, GatewayConfig};
use market_gateway::lifecycle::startup;
use market_gateway::observability::logging;

#[derive(Parser)]
#[command(name = "market-gateway", version, about = "Resilient market data gateway")]
struct Args {
    /// Path to the TOML config file. Falls back to GATEWAY_CONFIG, then defaults.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let path = args
        .config
        .or_else(|| std::env::var_os("GATEWAY_CONFIG").map(PathBuf::from));

    let config = match &path {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?path,
        bind_address = %config.listener.bind_address,
        "market-gateway starting"
    );

    startup::run(config).await?;
    Ok(())
}
