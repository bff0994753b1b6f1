//! Process-local cache backend.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use glob::Pattern;
use serde_json::Value;
use tokio::time::Instant;

use super::backend::{BackendStats, CacheBackend, CacheBackendError};

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: Value,
    expires_at: Instant,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Sharded in-memory store with lazy eviction and hit/miss counters.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: DashMap<String, MemoryEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Live entries with their remaining time to live.
    pub(crate) fn live_entries(&self) -> Vec<(String, Value, Duration)> {
        let now = Instant::now();
        self.entries
            .iter()
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| {
                (
                    entry.key().clone(),
                    entry.value.clone(),
                    entry.expires_at.saturating_duration_since(now),
                )
            })
            .collect()
    }

    fn insert(&self, key: &str, value: Value, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            MemoryEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> Result<Option<Value>, CacheBackendError> {
        let now = Instant::now();
        let lookup = self
            .entries
            .get(key)
            .map(|entry| (!entry.is_expired(now)).then(|| entry.value.clone()));
        let found = match lookup {
            Some(Some(value)) => Some(value),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| entry.is_expired(now));
                None
            }
            None => None,
        };

        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Value, ttl: Duration) -> Result<(), CacheBackendError> {
        self.insert(key, value, ttl);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheBackendError> {
        let now = Instant::now();
        Ok(self
            .entries
            .remove(key)
            .is_some_and(|(_, entry)| !entry.is_expired(now)))
    }

    async fn clear_pattern(&self, pattern: &Pattern) -> Result<usize, CacheBackendError> {
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.matches(key));
        Ok(before.saturating_sub(self.entries.len()))
    }

    async fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn stats(&self) -> BackendStats {
        BackendStats::new(
            self.name(),
            self.entries.len(),
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::backend::compile_pattern;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let backend = MemoryBackend::new();
        backend
            .set("price:sol", json!(142.5), Duration::from_millis(100))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(backend.get("price:sol").await.unwrap(), Some(json!(142.5)));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(backend.get("price:sol").await.unwrap(), None);
        assert!(backend.is_empty(), "expired entry is evicted on access");
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_overwrites_and_resets_expiry() {
        let backend = MemoryBackend::new();
        backend.set("k", json!(1), Duration::from_millis(100)).await.unwrap();
        tokio::time::advance(Duration::from_millis(80)).await;
        backend.set("k", json!(2), Duration::from_millis(100)).await.unwrap();
        tokio::time::advance(Duration::from_millis(80)).await;
        assert_eq!(backend.get("k").await.unwrap(), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_hit_miss_counters() {
        let backend = MemoryBackend::new();
        backend.set("a", json!("x"), Duration::from_secs(60)).await.unwrap();
        backend.get("a").await.unwrap();
        backend.get("a").await.unwrap();
        backend.get("b").await.unwrap();

        let stats = backend.stats();
        assert_eq!(stats.backend, "memory");
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_delete_and_clear_pattern() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);
        for key in ["submissions:0xaa", "submissions:0xaa:2", "submissions:0xbb", "price:0xaa"] {
            backend.set(key, json!(true), ttl).await.unwrap();
        }

        assert!(backend.delete("price:0xaa").await.unwrap());
        assert!(!backend.delete("price:0xaa").await.unwrap());

        let removed = backend
            .clear_pattern(&compile_pattern("submissions:0xaa*").unwrap())
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_removes_only_expired() {
        let backend = MemoryBackend::new();
        backend.set("short", json!(1), Duration::from_millis(10)).await.unwrap();
        backend.set("long", json!(2), Duration::from_secs(10)).await.unwrap();

        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(backend.sweep().await, 1);
        assert_eq!(backend.len(), 1);
        assert_eq!(backend.live_entries().len(), 1);
    }
}
