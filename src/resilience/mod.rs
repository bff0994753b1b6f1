//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Guarded upstream call:
//!     → circuit_breaker.rs (fail fast while the upstream is degraded)
//!     → admission queue (pace / enqueue)
//!     → request_fn
//!     → outcome classified by the breaker (upstream errors only)
//! ```
//!
//! # Design Decisions
//! - Circuit breaker prevents cascading failures
//! - Failure classification is a pure match over `FailureCategory`
//! - No retries: a refused or failed call is surfaced to the caller

pub mod circuit_breaker;

pub use circuit_breaker::{
    BreakerMetrics, BreakerStatus, CircuitBreaker, CircuitBreakerError, CircuitState,
    FailureClassifier,
};
