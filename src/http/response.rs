//! Error to HTTP response mapping.
//!
//! # Design Decisions
//! - Back-pressure and open circuits are 503 with `Retry-After`
//! - Queue timeouts are 504; upstream failures are 502 except 429, which is
//!   passed through

use std::time::Duration;

use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::cache::CacheBackendError;
use crate::error::FetchError;
use crate::upstream::FailureCategory;

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Whole seconds for `Retry-After`, never below one.
pub fn retry_after_secs(retry_after: Duration) -> u64 {
    let secs = retry_after.as_millis().div_ceil(1000) as u64;
    secs.max(1)
}

fn error_response(status: StatusCode, body: ErrorBody) -> Response {
    let retry_after = body.retry_after_secs;
    let mut response = (status, Json(body)).into_response();
    if let Some(secs) = retry_after {
        response
            .headers_mut()
            .insert(header::RETRY_AFTER, HeaderValue::from(secs));
    }
    response
}

impl FetchError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            FetchError::CircuitOpen(_) | FetchError::QueueFull(_) => StatusCode::SERVICE_UNAVAILABLE,
            FetchError::QueueTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            FetchError::Upstream(e) if e.category == FailureCategory::RateLimited => {
                StatusCode::TOO_MANY_REQUESTS
            }
            FetchError::Upstream(_) | FetchError::Dropped(_) => StatusCode::BAD_GATEWAY,
            FetchError::UnknownService(_) => StatusCode::NOT_FOUND,
            FetchError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for FetchError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(kind = self.kind(), error = %self, "Request failed");
        }
        error_response(
            status,
            ErrorBody {
                error: self.kind(),
                retry_after_secs: self.retry_after().map(retry_after_secs),
                message: self.to_string(),
            },
        )
    }
}

impl IntoResponse for CacheBackendError {
    fn into_response(self) -> Response {
        let (status, error) = match &self {
            CacheBackendError::InvalidPattern { .. } => (StatusCode::BAD_REQUEST, "invalid_pattern"),
            _ => (StatusCode::SERVICE_UNAVAILABLE, "cache_unavailable"),
        };
        error_response(
            status,
            ErrorBody {
                error,
                message: self.to_string(),
                retry_after_secs: None,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::{QueueFullError, QueueTimeoutError};
    use crate::resilience::{CircuitBreakerError, CircuitState};
    use crate::upstream::UpstreamError;

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(500)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1_001)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(30)), 30);
    }

    #[test]
    fn test_circuit_open_response() {
        let response = FetchError::CircuitOpen(CircuitBreakerError {
            service: "dex_aggregator".into(),
            state: CircuitState::Open,
            retry_after: Duration::from_millis(2_500),
        })
        .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers()[header::RETRY_AFTER], "3");
    }

    #[test]
    fn test_queue_errors() {
        let full = FetchError::QueueFull(QueueFullError {
            service: "market_indexer".into(),
            retry_after: Duration::from_secs(30),
        })
        .into_response();
        assert_eq!(full.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(full.headers()[header::RETRY_AFTER], "30");

        let timeout = FetchError::QueueTimeout(QueueTimeoutError {
            service: "market_indexer".into(),
            waited: Duration::from_secs(30),
        })
        .into_response();
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert!(timeout.headers().get(header::RETRY_AFTER).is_none());
    }

    #[test]
    fn test_upstream_status_mapping() {
        let limited = FetchError::Upstream(UpstreamError::rate_limited("slow down"));
        assert_eq!(limited.status_code(), StatusCode::TOO_MANY_REQUESTS);

        let server = FetchError::Upstream(UpstreamError::from_status(500, "oops"));
        assert_eq!(server.status_code(), StatusCode::BAD_GATEWAY);

        let unknown = FetchError::UnknownService("x".into());
        assert_eq!(unknown.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_cache_error_mapping() {
        let invalid = CacheBackendError::InvalidPattern {
            pattern: "[".into(),
            message: "unclosed".into(),
        };
        assert_eq!(invalid.into_response().status(), StatusCode::BAD_REQUEST);
        let down = CacheBackendError::Unavailable("refused".into());
        assert_eq!(down.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
