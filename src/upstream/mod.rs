//! Upstream service registry.
//!
//! # Responsibilities
//! - Own one circuit breaker and one admission queue per upstream service
//! - Run guarded calls: breaker → queue → request_fn
//! - Produce read-only snapshots for the health reporter
//!
//! # Design Decisions
//! - Built once at startup from configuration and shared through
//!   `GatewayContext`; there are no global singletons
//! - The service map is immutable after construction, so lookups take no
//!   lock; all mutable state lives inside each service's breaker and queue

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;

use crate::admission::{AdmissionQueue, QueueMetrics};
use crate::config::{QueueMode, ServiceConfig};
use crate::error::FetchError;
use crate::resilience::{BreakerStatus, CircuitBreaker, FailureClassifier};

pub mod error;
pub mod http;

pub use error::{FailureCategory, UpstreamError};
pub use http::HttpUpstream;

/// One upstream provider with its breaker and admission queue.
#[derive(Debug)]
pub struct Upstream {
    name: String,
    breaker: CircuitBreaker,
    queue: AdmissionQueue,
}

impl Upstream {
    pub fn new(name: impl Into<String>, config: &ServiceConfig) -> Self {
        let name = name.into();
        Self {
            breaker: CircuitBreaker::new(name.clone(), &config.circuit_breaker),
            queue: AdmissionQueue::new(name.clone(), config.rate_limit.clone()),
            name,
        }
    }

    /// Replace the breaker's failure classifier.
    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.breaker = self.breaker.with_classifier(classifier);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn queue(&self) -> &AdmissionQueue {
        &self.queue
    }

    /// Breaker wraps the queue: queue rejections are never seen by the
    /// failure classifier.
    pub async fn call<T, F, Fut>(&self, request_fn: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
        T: Send + 'static,
    {
        self.breaker
            .execute(|| self.queue.schedule(request_fn))
            .await
    }
}

/// Aggregate queue snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetricsReport {
    pub queues: BTreeMap<String, QueueMetrics>,
    pub total_queued: usize,
    pub total_rejections: u64,
    pub under_pressure: bool,
}

/// All configured upstream services, keyed by name.
#[derive(Debug, Default)]
pub struct UpstreamRegistry {
    services: BTreeMap<String, Arc<Upstream>>,
}

impl UpstreamRegistry {
    pub fn from_config(services: &BTreeMap<String, ServiceConfig>) -> Self {
        let mut registry = Self::default();
        for (name, config) in services {
            registry.insert(Upstream::new(name.clone(), config));
            tracing::info!(
                service = %name,
                mode = ?config.rate_limit.queue_mode,
                min_interval_ms = config.rate_limit.min_interval_ms,
                failure_threshold = config.circuit_breaker.failure_threshold,
                "Upstream registered"
            );
        }
        registry
    }

    /// Add or replace a service.
    pub fn insert(&mut self, upstream: Upstream) {
        self.services.insert(upstream.name.clone(), Arc::new(upstream));
    }

    pub fn get(&self, service: &str) -> Option<&Arc<Upstream>> {
        self.services.get(service)
    }

    fn require(&self, service: &str) -> Result<&Arc<Upstream>, FetchError> {
        self.get(service)
            .ok_or_else(|| FetchError::UnknownService(service.to_string()))
    }

    pub fn service_names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }

    /// Guarded call (breaker + queue) to `service`.
    pub async fn call<T, F, Fut>(&self, service: &str, request_fn: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
        T: Send + 'static,
    {
        self.require(service)?.call(request_fn).await
    }

    /// Paced call to `service`, bypassing the breaker.
    pub async fn rate_limited_request<T, F, Fut>(
        &self,
        service: &str,
        request_fn: F,
    ) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        self.require(service)?
            .queue
            .rate_limited_request(request_fn)
            .await
    }

    /// Strictly queued call to `service`, bypassing the breaker.
    pub async fn queue_request<T, F, Fut>(&self, service: &str, request_fn: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
        T: Send + 'static,
    {
        self.require(service)?.queue.queue_request(request_fn).await
    }

    pub fn all_breaker_statuses(&self) -> BTreeMap<String, BreakerStatus> {
        self.services
            .iter()
            .map(|(name, upstream)| (name.clone(), upstream.breaker.status()))
            .collect()
    }

    /// Snapshot of every strict queue.
    pub fn queue_metrics(&self) -> QueueMetricsReport {
        let queues: BTreeMap<String, QueueMetrics> = self
            .services
            .iter()
            .filter(|(_, upstream)| upstream.queue.mode() == QueueMode::Strict)
            .map(|(name, upstream)| (name.clone(), upstream.queue.metrics()))
            .collect();

        QueueMetricsReport {
            total_queued: queues.values().map(|q| q.queue_length).sum(),
            total_rejections: queues.values().map(|q| q.rejections).sum(),
            under_pressure: queues.values().any(|q| q.under_pressure),
            queues,
        }
    }
}
