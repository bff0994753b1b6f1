//! Typed upstream failures.
//!
//! # Responsibilities
//! - Describe an upstream call failure with an explicit category
//! - Map HTTP status codes and transport errors onto categories
//!
//! # Design Decisions
//! - The HTTP-calling side decides the category once; the circuit breaker
//!   only ever matches on it
//! - Cloneable so a coalesced cache fetch can hand the same failure to
//!   every waiter

use std::fmt;

use serde::{Deserialize, Serialize};

/// Closed set of upstream failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    /// Provider rejected excess volume (HTTP 429).
    RateLimited,
    /// Provider failed (HTTP 5xx).
    ServerError,
    /// Call did not complete in time.
    Timeout,
    /// Connection refused, reset or DNS failure.
    Connection,
    /// Request was rejected as invalid (HTTP 4xx other than 429).
    ClientError,
    /// Anything else (decode failures, unexpected payloads).
    Unknown,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::RateLimited => "rate_limited",
            FailureCategory::ServerError => "server_error",
            FailureCategory::Timeout => "timeout",
            FailureCategory::Connection => "connection",
            FailureCategory::ClientError => "client_error",
            FailureCategory::Unknown => "unknown",
        }
    }

    /// Category for a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => FailureCategory::RateLimited,
            500..=599 => FailureCategory::ServerError,
            408 => FailureCategory::Timeout,
            400..=499 => FailureCategory::ClientError,
            _ => FailureCategory::Unknown,
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error produced by a `request_fn` talking to an upstream provider.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("upstream {category} error{}: {message}", status_suffix(.status))]
pub struct UpstreamError {
    pub category: FailureCategory,
    pub status: Option<u16>,
    pub message: String,
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default()
}

impl UpstreamError {
    pub fn new(category: FailureCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            status: None,
            message: message.into(),
        }
    }

    /// Build from a non-success HTTP status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            category: FailureCategory::from_status(status),
            status: Some(status),
            message: message.into(),
        }
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::from_status(429, message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::from_status(500, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Timeout, message)
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(FailureCategory::Connection, message)
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return UpstreamError::from_status(status.as_u16(), err.to_string());
        }
        let category = if err.is_timeout() {
            FailureCategory::Timeout
        } else if err.is_connect() || err.is_request() {
            FailureCategory::Connection
        } else {
            FailureCategory::Unknown
        };
        UpstreamError::new(category, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_categories() {
        assert_eq!(FailureCategory::from_status(429), FailureCategory::RateLimited);
        assert_eq!(FailureCategory::from_status(503), FailureCategory::ServerError);
        assert_eq!(FailureCategory::from_status(404), FailureCategory::ClientError);
        assert_eq!(FailureCategory::from_status(408), FailureCategory::Timeout);
        assert_eq!(FailureCategory::from_status(302), FailureCategory::Unknown);
    }

    #[test]
    fn test_display_includes_status() {
        let err = UpstreamError::from_status(502, "bad gateway");
        assert_eq!(err.to_string(), "upstream server_error error (HTTP 502): bad gateway");

        let err = UpstreamError::timeout("took too long");
        assert_eq!(err.to_string(), "upstream timeout error: took too long");
    }
}
