//! Storage backends behind the cache facade.

use std::time::Duration;

use async_trait::async_trait;
use glob::Pattern;
use serde::Serialize;
use serde_json::Value;

/// Failure of the storage layer itself. Never fatal to a fetch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheBackendError {
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    #[error("cache I/O error: {0}")]
    Io(String),

    #[error("cache serialization error: {0}")]
    Serialization(String),

    #[error("invalid cache key pattern `{pattern}`: {message}")]
    InvalidPattern { pattern: String, message: String },
}

impl From<std::io::Error> for CacheBackendError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e.to_string())
    }
}

impl From<serde_json::Error> for CacheBackendError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Point-in-time backend counters for the health report.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackendStats {
    pub backend: &'static str,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

impl BackendStats {
    pub fn new(backend: &'static str, entries: usize, hits: u64, misses: u64) -> Self {
        let total = hits + misses;
        Self {
            backend,
            entries,
            hits,
            misses,
            hit_rate: if total == 0 { 0.0 } else { hits as f64 / total as f64 },
        }
    }
}

/// Key/value store with per-entry TTL.
///
/// Expired entries must behave as absent on every read.
#[async_trait]
pub trait CacheBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheBackendError>;

    /// Unconditional overwrite; resets expiry.
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheBackendError>;

    /// Returns whether a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheBackendError>;

    /// Removes every key matching `pattern`, returning the count.
    async fn clear_pattern(&self, pattern: &Pattern) -> Result<usize, CacheBackendError>;

    /// Drops expired entries, returning the count.
    async fn sweep(&self) -> usize;

    fn stats(&self) -> BackendStats;
}

/// Compile a glob key pattern (`*`, `?`, `[..]`).
pub fn compile_pattern(pattern: &str) -> Result<Pattern, CacheBackendError> {
    Pattern::new(pattern).map_err(|e| CacheBackendError::InvalidPattern {
        pattern: pattern.to_string(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(BackendStats::new("memory", 0, 0, 0).hit_rate, 0.0);
        assert_eq!(BackendStats::new("memory", 1, 3, 1).hit_rate, 0.75);
    }

    #[test]
    fn test_compile_pattern() {
        let pattern = compile_pattern("submissions:0xabc*").unwrap();
        assert!(pattern.matches("submissions:0xabc"));
        assert!(pattern.matches("submissions:0xabc:page=2"));
        assert!(!pattern.matches("submissions:0xdef"));

        let err = compile_pattern("broken[").unwrap_err();
        assert!(matches!(err, CacheBackendError::InvalidPattern { .. }));
    }
}
