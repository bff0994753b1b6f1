//! Health reporting subsystem.
//!
//! # Data Flow
//! ```text
//! GET /health          → liveness only, always 200
//! GET /health/detailed → report.rs
//!     breaker snapshots (every service)
//!     + queue snapshots (strict services)
//!     + cache stats
//!     → 200 when healthy, 503 otherwise
//! ```
//!
//! # Design Decisions
//! - Read-only: collecting a report never mutates breaker or queue state
//! - HALF_OPEN counts as healthy; only OPEN breakers and queue pressure
//!   degrade the report

pub mod handlers;
pub mod report;

pub use report::HealthReport;
