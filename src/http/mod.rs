//! HTTP surface.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (axum router, trace + timeout layers)
//!     → health handlers / admin handlers (bearer auth)
//!     → response.rs (typed errors → status, Retry-After, JSON body)
//! ```

pub mod response;
pub mod server;

pub use server::{AppState, HttpServer};
