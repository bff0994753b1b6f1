//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, freshness within TTL)
//! - Check mode-specific requirements (strict queues, snapshot backend)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{CacheBackendKind, GatewayConfig, QueueMode, ServiceConfig};

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path of the offending field.
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("`{}` is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::new("listener.request_timeout_secs", "must be > 0"));
    }

    let cache = &config.cache;
    if cache.default_ttl_ms == 0 {
        errors.push(ValidationError::new("cache.default_ttl_ms", "must be > 0"));
    }
    if cache.freshness_ms > cache.default_ttl_ms {
        errors.push(ValidationError::new(
            "cache.freshness_ms",
            format!(
                "freshness ({}ms) exceeds retention ttl ({}ms); stale fallback would never fire",
                cache.freshness_ms, cache.default_ttl_ms
            ),
        ));
    }
    if cache.sweep_interval_secs == 0 {
        errors.push(ValidationError::new("cache.sweep_interval_secs", "must be > 0"));
    }
    if cache.backend == CacheBackendKind::Snapshot {
        if cache.snapshot_path.as_deref().map_or(true, str::is_empty) {
            errors.push(ValidationError::new(
                "cache.snapshot_path",
                "required when backend = \"snapshot\"",
            ));
        }
        if cache.snapshot_interval_secs == 0 {
            errors.push(ValidationError::new("cache.snapshot_interval_secs", "must be > 0"));
        }
    }

    if config.services.is_empty() {
        errors.push(ValidationError::new("services", "at least one upstream service is required"));
    }
    for (name, service) in &config.services {
        validate_service(name, service, &mut errors);
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("`{}` is not a socket address", config.observability.metrics_address),
        ));
    }

    if config.admin.enabled && config.admin.api_key.trim().is_empty() {
        errors.push(ValidationError::new("admin.api_key", "must not be empty when admin is enabled"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_service(name: &str, service: &ServiceConfig, errors: &mut Vec<ValidationError>) {
    let rl = &service.rate_limit;
    let prefix = format!("services.{}.rate_limit", name);

    if rl.burst_limit == 0 {
        errors.push(ValidationError::new(format!("{}.burst_limit", prefix), "must be > 0"));
    }
    if rl.burst_window_ms == 0 {
        errors.push(ValidationError::new(format!("{}.burst_window_ms", prefix), "must be > 0"));
    }
    if !(rl.pressure_ratio > 0.0 && rl.pressure_ratio <= 1.0) {
        errors.push(ValidationError::new(
            format!("{}.pressure_ratio", prefix),
            "must be in (0, 1]",
        ));
    }
    if rl.queue_mode == QueueMode::Strict {
        if rl.max_queue_size == 0 {
            errors.push(ValidationError::new(
                format!("{}.max_queue_size", prefix),
                "must be > 0 in strict mode",
            ));
        }
        if rl.item_timeout_ms == 0 {
            errors.push(ValidationError::new(
                format!("{}.item_timeout_ms", prefix),
                "must be > 0 in strict mode",
            ));
        }
    }

    let cb = &service.circuit_breaker;
    let prefix = format!("services.{}.circuit_breaker", name);
    if cb.failure_threshold == 0 {
        errors.push(ValidationError::new(format!("{}.failure_threshold", prefix), "must be > 0"));
    }
    if cb.half_open_max_attempts == 0 {
        errors.push(ValidationError::new(
            format!("{}.half_open_max_attempts", prefix),
            "must be > 0",
        ));
    }
}
