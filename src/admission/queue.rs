//! Per-service admission queue.
//!
//! # Responsibilities
//! - Paced mode: each caller sleeps its own pacing delay, then calls out
//! - Strict mode: bounded FIFO drained by a single dispatcher task
//! - Backpressure: reject immediately when the FIFO is full
//! - Deadlines: expire items that waited longer than `item_timeout`
//!
//! # Design Decisions
//! - State sits behind one mutex per service; it is never held across `.await`
//! - The dispatcher paces *before* popping, so an item keeps its deadline
//!   until the moment it is actually dispatched
//! - A deadline only removes a still-queued item; a dispatched call runs to
//!   completion
//! - Waiting callers own a ticket; dropping the caller's future removes the
//!   item, so no detached timer or job outlives its requester

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::oneshot;
use tokio::time::Instant;

use super::pacing::Pacer;
use super::{QueueFullError, QueueTimeoutError};
use crate::config::{QueueMode, RateLimitConfig};
use crate::error::FetchError;
use crate::observability::metrics;
use crate::upstream::UpstreamError;

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

struct QueuedItem {
    id: u64,
    enqueued_at: Instant,
    job: Job,
}

#[derive(Debug, Default, Clone, Copy)]
struct QueueCounters {
    dispatched: u64,
    rejected_full: u64,
    timed_out: u64,
}

struct QueueState {
    pacer: Pacer,
    items: VecDeque<QueuedItem>,
    next_id: u64,
    running: bool,
    counters: QueueCounters,
}

struct Shared {
    service: String,
    config: RateLimitConfig,
    state: Mutex<QueueState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Remove a still-queued item. Returns false if it was already dispatched.
    fn remove(&self, id: u64) -> bool {
        let mut state = self.lock();
        match state.items.iter().position(|item| item.id == id) {
            Some(pos) => {
                state.items.remove(pos);
                metrics::record_queue_length(&self.service, state.items.len());
                true
            }
            None => false,
        }
    }
}

/// Snapshot of one queue for the health reporter.
#[derive(Debug, Clone, Serialize)]
pub struct QueueMetrics {
    pub mode: QueueMode,
    pub queue_length: usize,
    pub max_queue_size: usize,
    /// Requests refused by capacity or expired by deadline.
    pub rejections: u64,
    pub timeouts: u64,
    pub dispatched: u64,
    pub under_pressure: bool,
}

/// Admission control for one upstream service.
#[derive(Clone)]
pub struct AdmissionQueue {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for AdmissionQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionQueue")
            .field("service", &self.shared.service)
            .field("mode", &self.shared.config.queue_mode)
            .finish_non_exhaustive()
    }
}

impl AdmissionQueue {
    pub fn new(service: impl Into<String>, config: RateLimitConfig) -> Self {
        let pacer = Pacer::new(&config);
        Self {
            shared: Arc::new(Shared {
                service: service.into(),
                config,
                state: Mutex::new(QueueState {
                    pacer,
                    items: VecDeque::new(),
                    next_id: 0,
                    running: false,
                    counters: QueueCounters::default(),
                }),
            }),
        }
    }

    pub fn service(&self) -> &str {
        &self.shared.service
    }

    pub fn mode(&self) -> QueueMode {
        self.shared.config.queue_mode
    }

    /// Admit `request_fn` according to the configured mode.
    pub async fn schedule<T, F, Fut>(&self, request_fn: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
        T: Send + 'static,
    {
        match self.shared.config.queue_mode {
            QueueMode::Paced => self.rate_limited_request(request_fn).await,
            QueueMode::Strict => self.queue_request(request_fn).await,
        }
    }

    /// Sleep the pacing delay, record the dispatch and call out directly.
    pub async fn rate_limited_request<T, F, Fut>(&self, request_fn: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let delay = self.shared.lock().pacer.next_delay(Instant::now());
        if !delay.is_zero() {
            tracing::trace!(
                service = %self.shared.service,
                delay_ms = delay.as_millis() as u64,
                "Pacing upstream request"
            );
            tokio::time::sleep(delay).await;
        }
        {
            let mut state = self.shared.lock();
            state.pacer.record_dispatch(Instant::now());
            state.counters.dispatched += 1;
        }

        timed_call(&self.shared.service, request_fn()).await.map_err(FetchError::from)
    }

    /// Enqueue `request_fn` behind earlier requests and wait for its result.
    pub async fn queue_request<T, F, Fut>(&self, request_fn: F) -> Result<T, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, UpstreamError>> + Send + 'static,
        T: Send + 'static,
    {
        let shared = &self.shared;
        let (tx, mut rx) = oneshot::channel();
        let service = shared.service.clone();
        let job: Job = Box::pin(async move {
            let result = timed_call(&service, request_fn()).await;
            let _ = tx.send(result);
        });

        let now = Instant::now();
        let deadline = now + shared.config.item_timeout();
        let (id, spawn_dispatcher) = {
            let mut state = shared.lock();
            if state.items.len() >= shared.config.max_queue_size {
                state.counters.rejected_full += 1;
                let queue_length = state.items.len();
                drop(state);
                metrics::record_queue_rejection(&shared.service, "full");
                tracing::warn!(
                    service = %shared.service,
                    queue_length,
                    "Admission queue full, rejecting request"
                );
                return Err(QueueFullError {
                    service: shared.service.clone(),
                    retry_after: shared.config.queue_full_retry_after(),
                }
                .into());
            }

            let id = state.next_id;
            state.next_id += 1;
            state.items.push_back(QueuedItem {
                id,
                enqueued_at: now,
                job,
            });
            metrics::record_queue_length(&shared.service, state.items.len());

            let spawn_dispatcher = !state.running;
            state.running = true;
            (id, spawn_dispatcher)
        };

        if spawn_dispatcher {
            tokio::spawn(dispatch_loop(Arc::clone(shared)));
        }

        let mut ticket = QueueTicket {
            shared,
            id,
            armed: true,
        };

        let waited = tokio::time::timeout_at(deadline, &mut rx).await;
        let outcome = match waited {
            Ok(outcome) => outcome,
            Err(_) => {
                if ticket.expire() {
                    shared.lock().counters.timed_out += 1;
                    metrics::record_queue_rejection(&shared.service, "timeout");
                    tracing::warn!(
                        service = %shared.service,
                        waited_ms = shared.config.item_timeout_ms,
                        "Queued request expired before dispatch"
                    );
                    return Err(QueueTimeoutError {
                        service: shared.service.clone(),
                        waited: shared.config.item_timeout(),
                    }
                    .into());
                }
                // Dispatched right at the deadline: the call is in flight.
                rx.await
            }
        };
        ticket.armed = false;

        match outcome {
            Ok(result) => result.map_err(FetchError::from),
            Err(_) => Err(FetchError::Dropped(shared.service.clone())),
        }
    }

    /// Snapshot for the health reporter.
    pub fn metrics(&self) -> QueueMetrics {
        let state = self.shared.lock();
        let config = &self.shared.config;
        let queue_length = state.items.len();
        let under_pressure = config.queue_mode == QueueMode::Strict
            && queue_length as f64 >= config.max_queue_size as f64 * config.pressure_ratio;
        QueueMetrics {
            mode: config.queue_mode,
            queue_length,
            max_queue_size: config.max_queue_size,
            rejections: state.counters.rejected_full + state.counters.timed_out,
            timeouts: state.counters.timed_out,
            dispatched: state.counters.dispatched,
            under_pressure,
        }
    }
}

/// Owned by a waiting caller; removes its item if the caller goes away.
struct QueueTicket<'a> {
    shared: &'a Arc<Shared>,
    id: u64,
    armed: bool,
}

impl QueueTicket<'_> {
    fn expire(&mut self) -> bool {
        self.armed = false;
        self.shared.remove(self.id)
    }
}

impl Drop for QueueTicket<'_> {
    fn drop(&mut self) {
        if self.armed && self.shared.remove(self.id) {
            tracing::debug!(service = %self.shared.service, id = self.id, "Queued request abandoned by caller");
        }
    }
}

/// Clears the running flag if the dispatcher task unwinds or is aborted.
/// A dispatcher that goes idle hands the flag back under the lock and
/// disarms the guard, since a successor may already own it.
struct DispatcherGuard {
    shared: Arc<Shared>,
    armed: bool,
}

impl DispatcherGuard {
    fn new(shared: Arc<Shared>) -> Self {
        Self { shared, armed: true }
    }

    fn release(&mut self, state: &mut QueueState) {
        state.running = false;
        self.armed = false;
    }
}

impl Drop for DispatcherGuard {
    fn drop(&mut self) {
        if self.armed {
            self.shared.lock().running = false;
        }
    }
}

async fn dispatch_loop(shared: Arc<Shared>) {
    let mut guard = DispatcherGuard::new(Arc::clone(&shared));
    tracing::debug!(service = %shared.service, "Queue dispatcher started");

    loop {
        let delay = {
            let mut state = shared.lock();
            if state.items.is_empty() {
                guard.release(&mut state);
                break;
            }
            state.pacer.next_delay(Instant::now())
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let item = {
            let mut state = shared.lock();
            match state.items.pop_front() {
                Some(item) => {
                    state.pacer.record_dispatch(Instant::now());
                    state.counters.dispatched += 1;
                    metrics::record_queue_length(&shared.service, state.items.len());
                    item
                }
                None => {
                    guard.release(&mut state);
                    break;
                }
            }
        };

        tracing::debug!(
            service = %shared.service,
            id = item.id,
            waited_ms = item.enqueued_at.elapsed().as_millis() as u64,
            "Dispatching queued request"
        );
        item.job.await;
    }

    tracing::debug!(service = %shared.service, "Queue dispatcher idle");
}

async fn timed_call<T, Fut>(service: &str, call: Fut) -> Result<T, UpstreamError>
where
    Fut: Future<Output = Result<T, UpstreamError>>,
{
    let started = Instant::now();
    let result = call.await;
    let outcome = match &result {
        Ok(_) => "success",
        Err(e) => e.category.as_str(),
    };
    metrics::record_upstream_call(service, outcome, started.elapsed());
    result
}
