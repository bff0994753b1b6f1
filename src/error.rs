//! Error taxonomy for guarded upstream fetches.
//!
//! # Propagation
//! ```text
//! request_fn        → UpstreamError       (classified by the breaker)
//! admission queue   → QueueFullError / QueueTimeoutError (never classified)
//! circuit breaker   → CircuitBreakerError (call never attempted)
//! cache             → CacheBackendError   (degrades to a miss, never surfaces here)
//! ```
//!
//! Every variant is `Clone`: followers of a coalesced cache fetch receive the
//! leader's failure by value.

use std::time::Duration;

use crate::admission::{QueueFullError, QueueTimeoutError};
use crate::resilience::circuit_breaker::CircuitBreakerError;
use crate::upstream::UpstreamError;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    CircuitOpen(#[from] CircuitBreakerError),

    #[error(transparent)]
    QueueFull(#[from] QueueFullError),

    #[error(transparent)]
    QueueTimeout(#[from] QueueTimeoutError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("no upstream service named `{0}` is configured")]
    UnknownService(String),

    /// The dispatcher dropped the request before it produced a result.
    #[error("request to `{0}` was dropped before completion")]
    Dropped(String),

    #[error("cached value could not be (de)serialized: {0}")]
    Serialization(String),
}

impl FetchError {
    /// Suggested client back-off, when the error carries one.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            FetchError::CircuitOpen(e) => Some(e.retry_after),
            FetchError::QueueFull(e) => Some(e.retry_after),
            _ => None,
        }
    }

    /// The upstream error if the request was actually attempted and failed.
    pub fn as_upstream(&self) -> Option<&UpstreamError> {
        match self {
            FetchError::Upstream(e) => Some(e),
            _ => None,
        }
    }

    /// Short machine-readable kind, used for metrics labels and JSON bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::CircuitOpen(_) => "circuit_open",
            FetchError::QueueFull(_) => "queue_full",
            FetchError::QueueTimeout(_) => "queue_timeout",
            FetchError::Upstream(_) => "upstream",
            FetchError::UnknownService(_) => "unknown_service",
            FetchError::Dropped(_) => "dropped",
            FetchError::Serialization(_) => "serialization",
        }
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::Serialization(err.to_string())
    }
}
