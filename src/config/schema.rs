//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::upstream::FailureCategory;

/// Root configuration for the market data gateway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, request timeout).
    pub listener: ListenerConfig,

    /// Response cache settings.
    pub cache: CacheConfig,

    /// Upstream providers keyed by service name.
    pub services: BTreeMap<String, ServiceConfig>,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Operational endpoints.
    pub admin: AdminConfig,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listener: ListenerConfig::default(),
            cache: CacheConfig::default(),
            services: default_services(),
            observability: ObservabilityConfig::default(),
            admin: AdminConfig::default(),
        }
    }
}

/// The three providers the gateway talks to out of the box.
fn default_services() -> BTreeMap<String, ServiceConfig> {
    let mut services = BTreeMap::new();
    services.insert(
        "dex_aggregator".to_string(),
        ServiceConfig {
            rate_limit: RateLimitConfig {
                min_interval_ms: 200,
                jitter_ms: 50,
                burst_limit: 5,
                burst_window_ms: 1_000,
                ..RateLimitConfig::default()
            },
            ..ServiceConfig::default()
        },
    );
    services.insert(
        "market_indexer".to_string(),
        ServiceConfig {
            rate_limit: RateLimitConfig {
                min_interval_ms: 2_000,
                jitter_ms: 250,
                burst_limit: 25,
                burst_window_ms: 60_000,
                queue_mode: QueueMode::Strict,
                max_queue_size: 50,
                item_timeout_ms: 30_000,
                ..RateLimitConfig::default()
            },
            ..ServiceConfig::default()
        },
    );
    services.insert(
        "metadata_rpc".to_string(),
        ServiceConfig {
            rate_limit: RateLimitConfig {
                min_interval_ms: 100,
                jitter_ms: 25,
                burst_limit: 10,
                burst_window_ms: 1_000,
                ..RateLimitConfig::default()
            },
            circuit_breaker: CircuitBreakerConfig {
                failure_threshold: 3,
                ..CircuitBreakerConfig::default()
            },
        },
    );
    services
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Total time allowed for one HTTP request in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Which storage the cache sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheBackendKind {
    /// Process-local map, lost on restart.
    Memory,
    /// Process-local map periodically written to a JSON file and reloaded at startup.
    Snapshot,
}

/// Cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackendKind,

    /// Retention TTL applied when callers do not pass one.
    pub default_ttl_ms: u64,

    /// How old a timestamped value may be and still count as fresh.
    pub freshness_ms: u64,

    /// Interval of the expired-entry sweep.
    pub sweep_interval_secs: u64,

    /// Snapshot file (snapshot backend only).
    pub snapshot_path: Option<String>,

    /// Interval between snapshot writes in seconds.
    pub snapshot_interval_secs: u64,
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn freshness(&self) -> Duration {
        Duration::from_millis(self.freshness_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackendKind::Memory,
            default_ttl_ms: 300_000,
            freshness_ms: 60_000,
            sweep_interval_secs: 60,
            snapshot_path: None,
            snapshot_interval_secs: 30,
        }
    }
}

/// Per-upstream configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub rate_limit: RateLimitConfig,
    pub circuit_breaker: CircuitBreakerConfig,
}

/// How calls to an upstream are admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueMode {
    /// Each caller sleeps its own pacing delay, no queue.
    Paced,
    /// Calls go through a bounded FIFO drained by one dispatcher.
    Strict,
}

/// Admission queue configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Floor between two dispatches in milliseconds.
    pub min_interval_ms: u64,

    /// Upper bound of the random delay added to every dispatch.
    pub jitter_ms: u64,

    /// Dispatches allowed per burst window.
    pub burst_limit: u32,

    /// Fixed burst window length in milliseconds.
    pub burst_window_ms: u64,

    pub queue_mode: QueueMode,

    /// Strict mode: requests beyond this many waiting are rejected.
    pub max_queue_size: usize,

    /// Strict mode: how long an item may wait before being expired.
    pub item_timeout_ms: u64,

    /// Retry-after hint attached to queue-full rejections, in milliseconds.
    pub queue_full_retry_after_ms: u64,

    /// Fraction of `max_queue_size` at which the queue reports pressure.
    pub pressure_ratio: f64,
}

impl RateLimitConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_millis(self.item_timeout_ms)
    }

    pub fn queue_full_retry_after(&self) -> Duration {
        Duration::from_millis(self.queue_full_retry_after_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1_000,
            jitter_ms: 100,
            burst_limit: 10,
            burst_window_ms: 10_000,
            queue_mode: QueueMode::Paced,
            max_queue_size: 100,
            item_timeout_ms: 30_000,
            queue_full_retry_after_ms: 30_000,
            pressure_ratio: 0.8,
        }
    }
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive counted failures that open the circuit.
    pub failure_threshold: u32,

    /// Time the circuit stays open before a trial is allowed.
    pub reset_timeout_ms: u64,

    /// Concurrent trial calls allowed while half-open.
    pub half_open_max_attempts: u32,

    /// Failure categories that count toward opening the circuit.
    pub counted_failures: Vec<FailureCategory>,
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout_ms: 30_000,
            half_open_max_attempts: 1,
            counted_failures: vec![
                FailureCategory::ServerError,
                FailureCategory::Timeout,
                FailureCategory::Connection,
                FailureCategory::Unknown,
            ],
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Emit logs as JSON lines instead of the human-readable format.
    pub json_logs: bool,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin endpoint configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Mount the admin routes.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_toml_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.cache.default_ttl_ms, 300_000);
        assert_eq!(config.services.len(), 3);
        assert_eq!(
            config.services["market_indexer"].rate_limit.queue_mode,
            QueueMode::Strict
        );
    }

    #[test]
    fn test_service_section_parses() {
        let config: GatewayConfig = toml::from_str(
            r#"
            [services.birdeye.rate_limit]
            min_interval_ms = 2000
            queue_mode = "strict"
            max_queue_size = 5

            [services.birdeye.circuit_breaker]
            failure_threshold = 3
            counted_failures = ["server_error", "timeout"]
            "#,
        )
        .unwrap();

        assert_eq!(config.services.len(), 1);
        let svc = &config.services["birdeye"];
        assert_eq!(svc.rate_limit.min_interval(), Duration::from_secs(2));
        assert_eq!(svc.rate_limit.max_queue_size, 5);
        assert_eq!(svc.rate_limit.jitter_ms, 100);
        assert_eq!(svc.circuit_breaker.failure_threshold, 3);
        assert_eq!(
            svc.circuit_breaker.counted_failures,
            vec![FailureCategory::ServerError, FailureCategory::Timeout]
        );
    }
}
