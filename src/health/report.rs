//! Aggregated breaker, queue and cache health.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::cache::CacheStats;
use crate::context::GatewayContext;
use crate::resilience::{BreakerStatus, CircuitState};
use crate::upstream::QueueMetricsReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub open_breakers: Vec<String>,
    pub breakers: BTreeMap<String, BreakerStatus>,
    pub queues: QueueMetricsReport,
    pub cache: CacheStats,
}

impl HealthReport {
    pub fn collect(ctx: &GatewayContext) -> Self {
        let breakers = ctx.upstreams.all_breaker_statuses();
        let queues = ctx.upstreams.queue_metrics();
        let open_breakers: Vec<String> = breakers
            .iter()
            .filter(|(_, status)| status.state == CircuitState::Open)
            .map(|(name, _)| name.clone())
            .collect();

        let status = if open_breakers.is_empty() && !queues.under_pressure {
            HealthStatus::Healthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            open_breakers,
            breakers,
            queues,
            cache: ctx.cache.stats(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
