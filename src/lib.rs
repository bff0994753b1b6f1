//! Resilient-fetch core for a token market data gateway.

pub mod admission;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod resilience;
pub mod upstream;

pub mod admin;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use cache::Cache;
pub use config::GatewayConfig;
pub use context::GatewayContext;
pub use error::FetchError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use upstream::UpstreamRegistry;
