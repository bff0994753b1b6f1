//! Stampede-safe TTL cache.
//!
//! # Data Flow
//! ```text
//! get_or_set(key):
//!     backend hit → return
//!     miss → in-flight map
//!         leader   → compute → store → publish → remove flight
//!         follower → await leader's outcome (value or error)
//!
//! get_or_set_with_freshness(key):
//!     timestamped hit within freshness window → return
//!     otherwise coalesced fetch
//!         failure + any cached copy → serve stale copy
//! ```
//!
//! # Design Decisions
//! - Values are stored as JSON so any backend can hold them; callers get a
//!   typed API through serde
//! - Backend faults never fail a fetch: reads degrade to a miss and writes
//!   are logged
//! - The freshness envelope carries its own capture time, independent of
//!   the backend TTL clock

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::{CacheBackendKind, CacheConfig};
use crate::error::FetchError;
use crate::observability::metrics;

pub mod backend;
mod inflight;
pub mod memory;
pub mod snapshot;

pub use backend::{BackendStats, CacheBackend, CacheBackendError};
pub use memory::MemoryBackend;
pub use snapshot::SnapshotBackend;

use inflight::{Flight, InflightMap};
use snapshot::epoch_ms;

/// A cached value with its age relative to the freshness window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachedValue<T> {
    pub value: T,
    pub age: Duration,
    pub fresh: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct Timestamped {
    value: Value,
    cached_at_ms: u64,
}

/// How a freshly computed value is written back, and what an existing
/// entry must satisfy to be reused instead.
#[derive(Debug, Clone, Copy)]
enum StoreAs {
    Plain(Duration),
    Timestamped { ttl: Duration, freshness: Duration },
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    #[serde(flatten)]
    pub backend: BackendStats,
    pub in_flight: usize,
    pub default_ttl_ms: u64,
    pub freshness_ms: u64,
}

#[derive(Clone)]
pub struct Cache {
    backend: Arc<dyn CacheBackend>,
    snapshot: Option<Arc<SnapshotBackend>>,
    inflight: InflightMap,
    default_ttl: Duration,
    freshness: Duration,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("backend", &self.backend.name())
            .field("default_ttl", &self.default_ttl)
            .field("freshness", &self.freshness)
            .finish()
    }
}

impl Cache {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration, freshness: Duration) -> Self {
        Self {
            backend,
            snapshot: None,
            inflight: InflightMap::default(),
            default_ttl,
            freshness,
        }
    }

    pub fn in_memory(default_ttl: Duration, freshness: Duration) -> Self {
        Self::new(Arc::new(MemoryBackend::new()), default_ttl, freshness)
    }

    /// Build the configured backend. A snapshot file that cannot be read is
    /// logged and the cache starts empty.
    pub async fn from_config(config: &CacheConfig) -> Result<Self, CacheBackendError> {
        match config.backend {
            CacheBackendKind::Memory => Ok(Self::in_memory(config.default_ttl(), config.freshness())),
            CacheBackendKind::Snapshot => {
                let path = config.snapshot_path.as_deref().ok_or_else(|| {
                    CacheBackendError::Unavailable("snapshot backend requires snapshot_path".into())
                })?;
                let snapshot = match SnapshotBackend::load(path).await {
                    Ok(backend) => backend,
                    Err(e) => {
                        tracing::warn!(path, error = %e, "Cache snapshot unreadable, starting empty");
                        SnapshotBackend::new(path)
                    }
                };
                let snapshot = Arc::new(snapshot);
                let mut cache = Self::new(
                    Arc::clone(&snapshot) as Arc<dyn CacheBackend>,
                    config.default_ttl(),
                    config.freshness(),
                );
                cache.snapshot = Some(snapshot);
                Ok(cache)
            }
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn freshness(&self) -> Duration {
        self.freshness
    }

    async fn read(&self, key: &str) -> Option<Value> {
        match self.backend.get(key).await {
            Ok(Some(value)) => {
                metrics::record_cache_lookup("hit");
                tracing::debug!(key, "Cache hit");
                Some(value)
            }
            Ok(None) => {
                metrics::record_cache_lookup("miss");
                tracing::debug!(key, "Cache miss");
                None
            }
            Err(e) => {
                metrics::record_cache_lookup("error");
                tracing::warn!(key, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn write(&self, key: &str, value: Value, ttl: Duration) {
        if let Err(e) = self.backend.set(key, value, ttl).await {
            tracing::warn!(key, error = %e, "Cache write failed");
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.read(key).await?;
        decode(key, value)
    }

    pub async fn set<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheBackendError> {
        self.backend.set(key, serde_json::to_value(value)?, ttl).await
    }

    pub async fn delete(&self, key: &str) -> Result<bool, CacheBackendError> {
        self.backend.delete(key).await
    }

    /// Remove every key matching a glob pattern such as `submissions:0xabc*`.
    pub async fn clear_pattern(&self, pattern: &str) -> Result<usize, CacheBackendError> {
        let compiled = backend::compile_pattern(pattern)?;
        let removed = self.backend.clear_pattern(&compiled).await?;
        tracing::info!(pattern, removed, "Cache entries invalidated");
        Ok(removed)
    }

    /// Cached value for `key`, or the result of `compute`, which runs at most
    /// once across all concurrent callers for the same key.
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, ttl: Duration, compute: F) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        if let Some(hit) = self.get(key).await {
            return Ok(hit);
        }
        self.coalesce(key, StoreAs::Plain(ttl), compute).await
    }

    pub async fn set_with_timestamp<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), CacheBackendError> {
        self.store_timestamped(key, serde_json::to_value(value)?, ttl, epoch_ms())
            .await
    }

    pub(crate) async fn store_timestamped(
        &self,
        key: &str,
        value: Value,
        ttl: Duration,
        cached_at_ms: u64,
    ) -> Result<(), CacheBackendError> {
        let envelope = serde_json::to_value(Timestamped { value, cached_at_ms })?;
        self.backend.set(key, envelope, ttl).await
    }

    /// Timestamped value with its age, judged against the cache's freshness window.
    pub async fn get_with_meta<T: DeserializeOwned>(&self, key: &str) -> Option<CachedValue<T>> {
        self.get_with_meta_within(key, self.freshness).await
    }

    async fn get_with_meta_within<T: DeserializeOwned>(
        &self,
        key: &str,
        freshness: Duration,
    ) -> Option<CachedValue<T>> {
        let envelope: Timestamped = self.get(key).await?;
        let age = Duration::from_millis(epoch_ms().saturating_sub(envelope.cached_at_ms));
        Some(CachedValue {
            value: decode(key, envelope.value)?,
            age,
            fresh: age <= freshness,
        })
    }

    /// Freshness-aware fetch with the cache's default TTL and freshness window.
    pub async fn get_or_set_with_freshness<T, F, Fut>(&self, key: &str, compute: F) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        self.get_or_set_with_freshness_within(key, self.default_ttl, self.freshness, compute)
            .await
    }

    /// Returns a value no older than `freshness` when possible. If the
    /// refetch fails, any cached copy is served instead of the error.
    pub async fn get_or_set_with_freshness_within<T, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        freshness: Duration,
        compute: F,
    ) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let cached = self.get_with_meta_within::<T>(key, freshness).await;
        let stale = match cached {
            Some(CachedValue { value, fresh: true, .. }) => return Ok(value),
            other => other,
        };

        match self
            .coalesce(key, StoreAs::Timestamped { ttl, freshness }, compute)
            .await
        {
            Ok(value) => Ok(value),
            Err(err) => match stale {
                Some(cached) => {
                    metrics::record_cache_lookup("stale");
                    tracing::warn!(
                        key,
                        age_ms = cached.age.as_millis() as u64,
                        error = %err,
                        "Refetch failed, serving stale value"
                    );
                    Ok(cached.value)
                }
                None => Err(err),
            },
        }
    }

    async fn coalesce<T, F, Fut>(&self, key: &str, store: StoreAs, compute: F) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let leader = loop {
            match self.inflight.join_or_lead(key) {
                Flight::Leader(guard) => break guard,
                Flight::Follower(rx) => {
                    metrics::record_cache_lookup("coalesced");
                    match inflight::follow(rx).await {
                        Some(Ok(value)) => return Ok(serde_json::from_value(value)?),
                        Some(Err(err)) => return Err(err),
                        None => {
                            tracing::debug!(key, "In-flight leader abandoned, retrying");
                        }
                    }
                }
            }
        };

        if let Some((encoded, value)) = self.recheck::<T>(key, store).await {
            tracing::debug!(key, "Value stored by previous leader, skipping compute");
            leader.complete(Ok(encoded));
            return Ok(value);
        }

        let outcome = compute()
            .await
            .and_then(|computed| Ok((serde_json::to_value(&computed)?, computed)));
        match outcome {
            Ok((encoded, computed)) => {
                match store {
                    StoreAs::Plain(ttl) => self.write(key, encoded.clone(), ttl).await,
                    StoreAs::Timestamped { ttl, .. } => {
                        if let Err(e) = self
                            .store_timestamped(key, encoded.clone(), ttl, epoch_ms())
                            .await
                        {
                            tracing::warn!(key, error = %e, "Cache write failed");
                        }
                    }
                }
                leader.complete(Ok(encoded));
                Ok(computed)
            }
            Err(err) => {
                leader.complete(Err(err.clone()));
                Err(err)
            }
        }
    }

    /// Backend lookup for a caller that just became leader. Its first read
    /// may predate the write of a leader that finished in between.
    async fn recheck<T: DeserializeOwned>(&self, key: &str, store: StoreAs) -> Option<(Value, T)> {
        let stored = self.backend.get(key).await.ok().flatten()?;
        let value = match store {
            StoreAs::Plain(_) => stored,
            StoreAs::Timestamped { freshness, .. } => {
                let envelope: Timestamped = serde_json::from_value(stored).ok()?;
                let age = Duration::from_millis(epoch_ms().saturating_sub(envelope.cached_at_ms));
                if age > freshness {
                    return None;
                }
                envelope.value
            }
        };
        let decoded = serde_json::from_value(value.clone()).ok()?;
        Some((value, decoded))
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            backend: self.backend.stats(),
            in_flight: self.inflight.len(),
            default_ttl_ms: self.default_ttl.as_millis() as u64,
            freshness_ms: self.freshness.as_millis() as u64,
        }
    }

    /// Periodically drop expired entries until shutdown.
    pub fn spawn_sweeper(&self, interval: Duration, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let backend = Arc::clone(&self.backend);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let removed = backend.sweep().await;
                        if removed > 0 {
                            tracing::debug!(removed, "Swept expired cache entries");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("Cache sweeper received shutdown signal, exiting loop");
                        break;
                    }
                }
            }
        })
    }

    /// Periodically persist the snapshot backend, with a final save on
    /// shutdown. `None` for other backends.
    pub fn spawn_snapshot_writer(
        &self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Option<JoinHandle<()>> {
        let snapshot = self.snapshot.clone()?;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = snapshot.save().await {
                            tracing::warn!(error = %e, "Cache snapshot failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        match snapshot.save().await {
                            Ok(entries) => tracing::info!(entries, "Final cache snapshot written"),
                            Err(e) => tracing::warn!(error = %e, "Final cache snapshot failed"),
                        }
                        break;
                    }
                }
            }
        }))
    }
}

fn decode<T: DeserializeOwned>(key: &str, value: Value) -> Option<T> {
    match serde_json::from_value(value) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            tracing::warn!(key, error = %e, "Cached value has unexpected shape, treating as miss");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamError;
    use async_trait::async_trait;
    use futures::future::join_all;
    use glob::Pattern;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn cache() -> Cache {
        Cache::in_memory(Duration::from_secs(300), Duration::from_secs(60))
    }

    fn upstream_failure() -> FetchError {
        FetchError::Upstream(UpstreamError::from_status(503, "unavailable"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_misses_compute_once() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let callers = (0..20).map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            async move {
                cache
                    .get_or_set("token:0xaa", Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(200)).await;
                        Ok::<_, FetchError>(json!({"price": 1.5}))
                    })
                    .await
            }
        });
        let results = join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| r.as_ref().unwrap() == &json!({"price": 1.5})));
        assert_eq!(cache.stats().in_flight, 0);
        assert_eq!(cache.get::<Value>("token:0xaa").await, Some(json!({"price": 1.5})));
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_failure() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));

        let callers = (0..5).map(|_| {
            let cache = cache.clone();
            let calls = Arc::clone(&calls);
            async move {
                cache
                    .get_or_set::<u64, _, _>("k", Duration::from_secs(60), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(upstream_failure())
                    })
                    .await
            }
        });
        let results = join_all(callers).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Err(FetchError::Upstream(_)))));
        assert_eq!(cache.get::<u64>("k").await, None, "failures are not cached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_leader_hands_over() {
        let cache = cache();
        let leader_cache = cache.clone();
        let leader = tokio::spawn(async move {
            leader_cache
                .get_or_set("k", Duration::from_secs(60), || async {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok::<_, FetchError>(1u64)
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let follower_cache = cache.clone();
        let follower = tokio::spawn(async move {
            follower_cache
                .get_or_set("k", Duration::from_secs(60), || async { Ok::<_, FetchError>(2u64) })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        leader.abort();
        assert_eq!(follower.await.unwrap().unwrap(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttl_expiry() {
        let cache = cache();
        cache.set("k", &"v", Duration::from_millis(100)).await.unwrap();

        tokio::time::advance(Duration::from_millis(50)).await;
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));

        tokio::time::advance(Duration::from_millis(100)).await;
        assert_eq!(cache.get::<String>("k").await, None);
    }

    #[tokio::test]
    async fn test_stale_value_served_when_refetch_fails() {
        let cache = cache();
        let seventy_seconds_ago = epoch_ms() - 70_000;
        cache
            .store_timestamped("k", json!("old"), Duration::from_secs(300), seventy_seconds_ago)
            .await
            .unwrap();

        let meta = cache.get_with_meta::<String>("k").await.unwrap();
        assert!(!meta.fresh);
        assert!(meta.age >= Duration::from_secs(70));

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value: String = cache
            .get_or_set_with_freshness("k", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(upstream_failure())
            })
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1, "stale entry triggers a refetch");
        assert_eq!(value, "old");
    }

    #[tokio::test]
    async fn test_fresh_value_skips_compute() {
        let cache = cache();
        cache
            .set_with_timestamp("k", &json!("current"), Duration::from_secs(300))
            .await
            .unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let value: Value = cache
            .get_or_set_with_freshness("k", || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(json!("refetched"))
            })
            .await
            .unwrap();
        assert_eq!(value, json!("current"));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stale_value_replaced_on_successful_refetch() {
        let cache = cache();
        cache
            .store_timestamped("k", json!(1), Duration::from_secs(300), epoch_ms() - 70_000)
            .await
            .unwrap();

        let value: u64 = cache
            .get_or_set_with_freshness("k", || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(value, 2);

        let meta = cache.get_with_meta::<u64>("k").await.unwrap();
        assert_eq!(meta.value, 2);
        assert!(meta.fresh);
    }

    #[tokio::test]
    async fn test_refetch_failure_without_cache_propagates() {
        let cache = cache();
        let err = cache
            .get_or_set_with_freshness::<u64, _, _>("k", || async { Err(upstream_failure()) })
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Upstream(_)));
    }

    #[tokio::test]
    async fn test_clear_pattern_and_delete() {
        let cache = cache();
        let ttl = Duration::from_secs(60);
        cache.set("submissions:0xaa:1", &1, ttl).await.unwrap();
        cache.set("submissions:0xaa:2", &2, ttl).await.unwrap();
        cache.set("submissions:0xbb:1", &3, ttl).await.unwrap();

        assert_eq!(cache.clear_pattern("submissions:0xaa*").await.unwrap(), 2);
        assert!(cache.delete("submissions:0xbb:1").await.unwrap());
        assert_eq!(cache.stats().backend.entries, 0);
        assert!(cache.clear_pattern("[").await.is_err());
    }

    #[derive(Debug)]
    struct UnavailableBackend;

    #[async_trait]
    impl CacheBackend for UnavailableBackend {
        fn name(&self) -> &'static str {
            "unavailable"
        }
        async fn get(&self, _: &str) -> Result<Option<Value>, CacheBackendError> {
            Err(CacheBackendError::Unavailable("connection refused".into()))
        }
        async fn set(&self, _: &str, _: Value, _: Duration) -> Result<(), CacheBackendError> {
            Err(CacheBackendError::Unavailable("connection refused".into()))
        }
        async fn delete(&self, _: &str) -> Result<bool, CacheBackendError> {
            Err(CacheBackendError::Unavailable("connection refused".into()))
        }
        async fn clear_pattern(&self, _: &Pattern) -> Result<usize, CacheBackendError> {
            Err(CacheBackendError::Unavailable("connection refused".into()))
        }
        async fn sweep(&self) -> usize {
            0
        }
        fn stats(&self) -> BackendStats {
            BackendStats::new(self.name(), 0, 0, 0)
        }
    }

    #[tokio::test]
    async fn test_backend_fault_falls_through_to_compute() {
        let cache = Cache::new(
            Arc::new(UnavailableBackend),
            Duration::from_secs(60),
            Duration::from_secs(10),
        );

        let value: u64 = cache
            .get_or_set("k", Duration::from_secs(60), || async { Ok(42) })
            .await
            .unwrap();
        assert_eq!(value, 42);

        let value: u64 = cache
            .get_or_set_with_freshness("k", || async { Ok(43) })
            .await
            .unwrap();
        assert_eq!(value, 43);
        assert!(cache.get_with_meta::<u64>("k").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_on_shutdown() {
        let cache = cache();
        cache.set("k", &1, Duration::from_millis(10)).await.unwrap();

        let (tx, rx) = broadcast::channel(1);
        let handle = cache.spawn_sweeper(Duration::from_millis(100), rx);
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(cache.stats().backend.entries, 0);

        tx.send(()).unwrap();
        handle.await.unwrap();
        assert!(cache.spawn_snapshot_writer(Duration::from_secs(1), tx.subscribe()).is_none());
    }

    #[tokio::test]
    async fn test_snapshot_backend_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = CacheConfig {
            backend: CacheBackendKind::Snapshot,
            snapshot_path: Some(dir.path().join("cache.json").display().to_string()),
            ..CacheConfig::default()
        };
        let cache = Cache::from_config(&config).await.unwrap();
        cache.set("k", &"v", Duration::from_secs(60)).await.unwrap();
        assert_eq!(cache.stats().backend.backend, "snapshot");

        let (tx, rx) = broadcast::channel(1);
        let writer = cache
            .spawn_snapshot_writer(Duration::from_secs(3600), rx)
            .unwrap();
        tx.send(()).unwrap();
        writer.await.unwrap();

        let reloaded = Cache::from_config(&config).await.unwrap();
        assert_eq!(reloaded.get::<String>("k").await.as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn test_new_leader_reuses_value_stored_after_its_miss() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(60);

        // The caller's miss happened before this write landed.
        cache.set("price:0xaa", &1.5f64, ttl).await.unwrap();
        let value: f64 = {
            let calls = calls.clone();
            cache
                .coalesce("price:0xaa", StoreAs::Plain(ttl), move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(9.0)
                })
                .await
                .unwrap()
        };

        assert_eq!(value, 1.5);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_new_leader_ignores_stale_timestamped_value() {
        let cache = cache();
        let calls = Arc::new(AtomicUsize::new(0));
        let ttl = Duration::from_secs(300);
        cache
            .store_timestamped("token:0xaa", json!("old"), ttl, epoch_ms() - 120_000)
            .await
            .unwrap();

        let store = StoreAs::Timestamped {
            ttl,
            freshness: Duration::from_secs(60),
        };
        let fresh = {
            let calls = calls.clone();
            cache
                .coalesce("token:0xaa", store, move || async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok("new".to_string())
                })
                .await
                .unwrap()
        };
        assert_eq!(fresh, "new");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let reused = cache
            .coalesce("token:0xaa", store, || async { Ok("unused".to_string()) })
            .await
            .unwrap();
        assert_eq!(reused, "new");
    }
}
