//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define gateway metrics (cache, breaker, queue, upstream)
//! - Expose Prometheus-compatible metrics endpoint
//!
//! # Metrics
//! - `gateway_cache_requests_total` (counter): lookups by result (hit, miss, coalesced, stale, error)
//! - `gateway_breaker_transitions_total` (counter): state changes by service, target state
//! - `gateway_breaker_rejections_total` (counter): short-circuited calls by service
//! - `gateway_queue_rejections_total` (counter): admission rejections by service, reason
//! - `gateway_queue_length` (gauge): waiting strict-queue items by service
//! - `gateway_upstream_requests_total` (counter): attempted calls by service, outcome
//! - `gateway_upstream_duration_seconds` (histogram): upstream latency by service
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_cache_lookup(result: &'static str) {
    counter!("gateway_cache_requests_total", "result" => result).increment(1);
}

pub fn record_breaker_transition(service: &str, to: &'static str) {
    counter!(
        "gateway_breaker_transitions_total",
        "service" => service.to_string(),
        "to" => to
    )
    .increment(1);
}

pub fn record_breaker_rejection(service: &str) {
    counter!("gateway_breaker_rejections_total", "service" => service.to_string()).increment(1);
}

pub fn record_queue_rejection(service: &str, reason: &'static str) {
    counter!(
        "gateway_queue_rejections_total",
        "service" => service.to_string(),
        "reason" => reason
    )
    .increment(1);
}

pub fn record_queue_length(service: &str, length: usize) {
    gauge!("gateway_queue_length", "service" => service.to_string()).set(length as f64);
}

pub fn record_upstream_call(service: &str, outcome: &'static str, elapsed: Duration) {
    counter!(
        "gateway_upstream_requests_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!("gateway_upstream_duration_seconds", "service" => service.to_string())
        .record(elapsed.as_secs_f64());
}
