//! Process-wide gateway context: the cache plus every upstream's breaker and
//! queue, created once at startup and shared with handlers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{Cache, CacheBackendError};
use crate::config::GatewayConfig;
use crate::error::FetchError;
use crate::upstream::{UpstreamError, UpstreamRegistry};

#[derive(Debug, Clone)]
pub struct GatewayContext {
    pub cache: Cache,
    pub upstreams: Arc<UpstreamRegistry>,
}

impl GatewayContext {
    pub fn new(cache: Cache, upstreams: UpstreamRegistry) -> Self {
        Self {
            cache,
            upstreams: Arc::new(upstreams),
        }
    }

    pub async fn from_config(config: &GatewayConfig) -> Result<Self, CacheBackendError> {
        let cache = Cache::from_config(&config.cache).await?;
        let upstreams = UpstreamRegistry::from_config(&config.services);
        Ok(Self::new(cache, upstreams))
    }

    /// Guarded fetch: cache outermost, then the service's breaker, then its
    /// admission queue, then `request_fn`.
    pub async fn fetch<T, F, Fut>(
        &self,
        service: &str,
        key: &str,
        ttl: Duration,
        request_fn: F,
    ) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let upstream = self
            .upstreams
            .get(service)
            .ok_or_else(|| FetchError::UnknownService(service.to_string()))?;
        self.cache
            .get_or_set(key, ttl, || upstream.call(request_fn))
            .await
    }

    /// Guarded fetch with the freshness window; a failed refetch falls back
    /// to any cached copy.
    pub async fn fetch_fresh<T, F, Fut>(&self, service: &str, key: &str, request_fn: F) -> Result<T, FetchError>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
    {
        let upstream = self
            .upstreams
            .get(service)
            .ok_or_else(|| FetchError::UnknownService(service.to_string()))?;
        self.cache
            .get_or_set_with_freshness(key, || upstream.call(request_fn))
            .await
    }
}
