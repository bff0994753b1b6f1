//! Circuit breaker for upstream protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: upstream assumed down, requests fail fast
//! - Half-Open: a bounded number of trial requests probe recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open:      consecutive counted failures >= failure_threshold
//! Open → Half-Open:   next call after reset_timeout since the last failure
//! Half-Open → Closed: SUCCESS_THRESHOLD consecutive successes
//! Half-Open → Open:   any counted failure
//! ```
//!
//! # Design Decisions
//! - One breaker per upstream service, each behind its own mutex
//! - The lock is never held across the guarded call
//! - Only `FetchError::Upstream` errors reach the classifier; queue
//!   rejections neither count as failures nor as successes
//! - Trial slots are released by a guard, so a cancelled trial cannot
//!   wedge the breaker in Half-Open

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::config::CircuitBreakerConfig;
use crate::error::FetchError;
use crate::observability::metrics;
use crate::upstream::{FailureCategory, UpstreamError};

/// Consecutive half-open successes needed to close the circuit.
pub const SUCCESS_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The circuit refused to attempt the call.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("circuit breaker for `{service}` is {state}, retry in {}ms", .retry_after.as_millis())]
pub struct CircuitBreakerError {
    pub service: String,
    pub state: CircuitState,
    pub retry_after: Duration,
}

/// Decides whether an upstream error counts toward opening the circuit.
pub type FailureClassifier = Arc<dyn Fn(&UpstreamError) -> bool + Send + Sync>;

/// Classifier counting only the given categories.
pub fn counting(categories: Vec<FailureCategory>) -> FailureClassifier {
    Arc::new(move |err: &UpstreamError| categories.contains(&err.category))
}

/// Cumulative counters since process start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BreakerMetrics {
    pub total_requests: u64,
    pub succeeded: u64,
    /// Failures that counted toward the threshold.
    pub failed: u64,
    /// Errors that did not count (rate limits, client errors, queue rejections).
    pub ignored: u64,
    /// Calls refused without being attempted.
    pub rejected: u64,
}

/// Point-in-time view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
    pub half_open_in_flight: u32,
    pub metrics: BreakerMetrics,
    pub time_until_retry_ms: u64,
    pub last_state_change_ms_ago: u64,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_failure_at: Option<Instant>,
    half_open_in_flight: u32,
    /// Bumped on every transition. Outcomes of calls admitted under an
    /// older generation leave the state and counters alone.
    generation: u64,
    last_state_change: Instant,
    metrics: BreakerMetrics,
}

/// Per-service circuit breaker.
pub struct CircuitBreaker {
    service: String,
    failure_threshold: u32,
    reset_timeout: Duration,
    half_open_max_attempts: u32,
    classifier: FailureClassifier,
    inner: Mutex<BreakerState>,
}

impl fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("failure_threshold", &self.failure_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("half_open_max_attempts", &self.half_open_max_attempts)
            .finish_non_exhaustive()
    }
}

enum Outcome {
    Success,
    Failure,
    Ignored,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: &CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            failure_threshold: config.failure_threshold.max(1),
            reset_timeout: config.reset_timeout(),
            half_open_max_attempts: config.half_open_max_attempts.max(1),
            classifier: counting(config.counted_failures.clone()),
            inner: Mutex::new(BreakerState {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                consecutive_successes: 0,
                last_failure_at: None,
                half_open_in_flight: 0,
                generation: 0,
                last_state_change: Instant::now(),
                metrics: BreakerMetrics::default(),
            }),
        }
    }

    /// Replace the failure classifier.
    pub fn with_classifier(mut self, classifier: FailureClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` through the breaker.
    ///
    /// Returns `FetchError::CircuitOpen` without calling `f` when the circuit
    /// refuses the call; otherwise returns `f`'s result after updating state.
    pub async fn execute<T, F, Fut>(&self, f: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let permit = self.acquire()?;
        let result = f().await;

        let outcome = match &result {
            Ok(_) => Outcome::Success,
            Err(FetchError::Upstream(err)) if (self.classifier)(err) => Outcome::Failure,
            Err(_) => Outcome::Ignored,
        };
        permit.settle(outcome);
        result
    }

    fn acquire(&self) -> Result<CallPermit<'_>, CircuitBreakerError> {
        let mut inner = self.lock();
        let now = Instant::now();

        if inner.state == CircuitState::Open {
            let elapsed = inner
                .last_failure_at
                .map(|at| now.saturating_duration_since(at))
                .unwrap_or(self.reset_timeout);
            if elapsed >= self.reset_timeout {
                self.transition(&mut inner, CircuitState::HalfOpen, now);
            } else {
                inner.metrics.rejected += 1;
                drop(inner);
                metrics::record_breaker_rejection(&self.service);
                return Err(CircuitBreakerError {
                    service: self.service.clone(),
                    state: CircuitState::Open,
                    retry_after: self.reset_timeout - elapsed,
                });
            }
        }

        let trial = inner.state == CircuitState::HalfOpen;
        if trial {
            if inner.half_open_in_flight >= self.half_open_max_attempts {
                inner.metrics.rejected += 1;
                drop(inner);
                metrics::record_breaker_rejection(&self.service);
                tracing::debug!(service = %self.service, "Half-open trial budget exhausted");
                return Err(CircuitBreakerError {
                    service: self.service.clone(),
                    state: CircuitState::HalfOpen,
                    retry_after: Duration::ZERO,
                });
            }
            inner.half_open_in_flight += 1;
        }

        inner.metrics.total_requests += 1;
        Ok(CallPermit {
            breaker: self,
            generation: inner.generation,
            trial,
            settled: false,
        })
    }

    fn settle(&self, generation: u64, trial: bool, outcome: Option<Outcome>) {
        let mut inner = self.lock();
        let now = Instant::now();

        if generation != inner.generation {
            // Admitted before the last transition: counted in metrics only.
            match outcome {
                Some(Outcome::Success) => inner.metrics.succeeded += 1,
                Some(Outcome::Failure) => inner.metrics.failed += 1,
                Some(Outcome::Ignored) => inner.metrics.ignored += 1,
                None => {}
            }
            return;
        }

        if trial {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }

        match outcome {
            Some(Outcome::Success) => {
                inner.metrics.succeeded += 1;
                match inner.state {
                    CircuitState::Closed => inner.consecutive_failures = 0,
                    CircuitState::HalfOpen => {
                        inner.consecutive_successes += 1;
                        if inner.consecutive_successes >= SUCCESS_THRESHOLD {
                            self.transition(&mut inner, CircuitState::Closed, now);
                        }
                    }
                    CircuitState::Open => {}
                }
            }
            Some(Outcome::Failure) => {
                inner.metrics.failed += 1;
                inner.last_failure_at = Some(now);
                inner.consecutive_successes = 0;
                match inner.state {
                    CircuitState::Closed => {
                        inner.consecutive_failures += 1;
                        if inner.consecutive_failures >= self.failure_threshold {
                            self.transition(&mut inner, CircuitState::Open, now);
                        }
                    }
                    CircuitState::HalfOpen => {
                        inner.consecutive_failures += 1;
                        self.transition(&mut inner, CircuitState::Open, now);
                    }
                    CircuitState::Open => {}
                }
            }
            Some(Outcome::Ignored) => inner.metrics.ignored += 1,
            None => {}
        }
    }

    fn transition(&self, inner: &mut BreakerState, to: CircuitState, now: Instant) {
        let from = inner.state;
        if from == to {
            return;
        }
        inner.state = to;
        inner.generation += 1;
        inner.half_open_in_flight = 0;
        inner.consecutive_successes = 0;
        inner.last_state_change = now;

        match to {
            CircuitState::Open => {
                tracing::warn!(
                    service = %self.service,
                    from = %from,
                    failures = inner.consecutive_failures,
                    reset_timeout_ms = self.reset_timeout.as_millis() as u64,
                    "Circuit breaker opened"
                );
            }
            CircuitState::HalfOpen => {
                tracing::info!(service = %self.service, "Circuit breaker half-open, probing upstream");
            }
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
                inner.last_failure_at = None;
                tracing::info!(service = %self.service, from = %from, "Circuit breaker closed");
            }
        }
        metrics::record_breaker_transition(&self.service, to.as_str());
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    /// Snapshot for the health reporter.
    pub fn status(&self) -> BreakerStatus {
        let inner = self.lock();
        let now = Instant::now();
        let time_until_retry = match (inner.state, inner.last_failure_at) {
            (CircuitState::Open, Some(at)) => self
                .reset_timeout
                .saturating_sub(now.saturating_duration_since(at)),
            _ => Duration::ZERO,
        };
        BreakerStatus {
            state: inner.state,
            failure_count: inner.consecutive_failures,
            success_count: inner.consecutive_successes,
            half_open_in_flight: inner.half_open_in_flight,
            metrics: inner.metrics,
            time_until_retry_ms: time_until_retry.as_millis() as u64,
            last_state_change_ms_ago: now
                .saturating_duration_since(inner.last_state_change)
                .as_millis() as u64,
        }
    }

    /// Force the circuit closed and clear all counters.
    pub fn reset(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        self.transition(&mut inner, CircuitState::Closed, now);
        inner.consecutive_failures = 0;
        inner.consecutive_successes = 0;
        inner.last_failure_at = None;
        tracing::info!(service = %self.service, "Circuit breaker manually reset");
    }

    /// Force the circuit open; the reset timeout starts now.
    pub fn trip(&self) {
        let mut inner = self.lock();
        let now = Instant::now();
        inner.last_failure_at = Some(now);
        self.transition(&mut inner, CircuitState::Open, now);
        tracing::warn!(service = %self.service, "Circuit breaker manually tripped");
    }
}

/// Admission ticket for one call. Dropping it unsettled (the caller's future
/// was cancelled) frees the trial slot without recording an outcome.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    generation: u64,
    trial: bool,
    settled: bool,
}

impl CallPermit<'_> {
    fn settle(mut self, outcome: Outcome) {
        self.settled = true;
        self.breaker.settle(self.generation, self.trial, Some(outcome));
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.breaker.settle(self.generation, self.trial, None);
        }
    }
}
