//! Admission control subsystem.
//!
//! # Data Flow
//! ```text
//! Paced mode (rate_limited_request):
//!     pacing.rs computes delay (min interval, burst window, jitter)
//!     → caller sleeps
//!     → dispatch recorded
//!     → request_fn runs on the caller's task
//!
//! Strict mode (queue_request):
//!     capacity check → QueueFullError
//!     → FIFO push
//!     → dispatcher task: pace → pop head → run → settle caller
//!     → caller deadline → QueueTimeoutError if still queued
//! ```
//!
//! # Design Decisions
//! - One queue per upstream service; no shared lock across services
//! - Rejections are typed errors carrying back-off hints
//! - Nothing here retries; callers decide

use std::time::Duration;

mod pacing;
pub mod queue;

pub use queue::{AdmissionQueue, QueueMetrics};

/// The strict queue is at capacity.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("admission queue for `{service}` is full, retry in {}s", .retry_after.as_secs())]
pub struct QueueFullError {
    pub service: String,
    pub retry_after: Duration,
}

/// A queued request was not dispatched before its deadline.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("request to `{service}` waited {}ms in queue without being dispatched", .waited.as_millis())]
pub struct QueueTimeoutError {
    pub service: String,
    pub waited: Duration,
}
