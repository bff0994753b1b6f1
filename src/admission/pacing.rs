//! Dispatch pacing: minimum interval plus a fixed-window burst cap.

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;

use crate::config::RateLimitConfig;

/// Pacing state for one upstream service.
///
/// Burst accounting buckets dispatches by `floor(elapsed / window)`; it is a
/// fixed-window counter, so two windows can be filled back to back around a
/// boundary.
#[derive(Debug)]
pub(crate) struct Pacer {
    min_interval: Duration,
    jitter: Duration,
    burst_limit: u32,
    burst_window: Duration,
    origin: Instant,
    last_dispatch: Option<Instant>,
    windows: HashMap<u64, u32>,
}

impl Pacer {
    pub(crate) fn new(config: &RateLimitConfig) -> Self {
        Self {
            min_interval: config.min_interval(),
            jitter: Duration::from_millis(config.jitter_ms),
            burst_limit: config.burst_limit.max(1),
            burst_window: config.burst_window().max(Duration::from_millis(1)),
            origin: Instant::now(),
            last_dispatch: None,
            windows: HashMap::new(),
        }
    }

    fn window_index(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.origin).as_millis();
        (elapsed / self.burst_window.as_millis()) as u64
    }

    /// Time that must pass before the next dispatch is allowed, without jitter.
    /// Also drops counters of windows that are already over.
    pub(crate) fn required_delay(&mut self, now: Instant) -> Duration {
        let current = self.window_index(now);
        self.windows.retain(|&index, _| index >= current);

        let burst_wait = match self.windows.get(&current) {
            Some(&count) if count >= self.burst_limit => {
                let window_ms = self.burst_window.as_millis() as u64;
                let window_end = self.origin + Duration::from_millis((current + 1) * window_ms);
                window_end.saturating_duration_since(now)
            }
            _ => Duration::ZERO,
        };

        let interval_wait = self
            .last_dispatch
            .map(|last| self.min_interval.saturating_sub(now.saturating_duration_since(last)))
            .unwrap_or(Duration::ZERO);

        burst_wait.max(interval_wait)
    }

    /// Required delay plus a random jitter in `[0, jitter]`.
    pub(crate) fn next_delay(&mut self, now: Instant) -> Duration {
        self.required_delay(now) + random_jitter(self.jitter)
    }

    pub(crate) fn record_dispatch(&mut self, now: Instant) {
        self.last_dispatch = Some(now);
        let index = self.window_index(now);
        *self.windows.entry(index).or_insert(0) += 1;
    }

    #[cfg(test)]
    pub(crate) fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}

fn random_jitter(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pacer(min_interval_ms: u64, burst_limit: u32, burst_window_ms: u64) -> Pacer {
        Pacer::new(&RateLimitConfig {
            min_interval_ms,
            jitter_ms: 0,
            burst_limit,
            burst_window_ms,
            ..RateLimitConfig::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_min_interval() {
        let mut p = pacer(2_000, 100, 60_000);
        let t0 = Instant::now();
        assert_eq!(p.required_delay(t0), Duration::ZERO);

        p.record_dispatch(t0);
        assert_eq!(p.required_delay(t0), Duration::from_millis(2_000));
        assert_eq!(
            p.required_delay(t0 + Duration::from_millis(500)),
            Duration::from_millis(1_500)
        );
        assert_eq!(p.required_delay(t0 + Duration::from_millis(2_500)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_waits_for_window_end() {
        let mut p = pacer(0, 3, 1_000);
        let t0 = Instant::now();
        for i in 0..3 {
            let at = t0 + Duration::from_millis(i * 100);
            assert_eq!(p.required_delay(at), Duration::ZERO);
            p.record_dispatch(at);
        }
        assert_eq!(
            p.required_delay(t0 + Duration::from_millis(300)),
            Duration::from_millis(700)
        );
        assert_eq!(p.required_delay(t0 + Duration::from_millis(1_000)), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_larger_constraint_wins() {
        let mut p = pacer(800, 1, 1_000);
        let t0 = Instant::now();
        p.record_dispatch(t0 + Duration::from_millis(900));
        // burst: window ends at 1000 (100ms away); interval: 800ms away
        assert_eq!(
            p.required_delay(t0 + Duration::from_millis(900)),
            Duration::from_millis(800)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_allows_boundary_burst() {
        let mut p = pacer(0, 2, 1_000);
        let t0 = Instant::now();
        p.record_dispatch(t0 + Duration::from_millis(990));
        p.record_dispatch(t0 + Duration::from_millis(995));
        // next window starts at 1000: two more dispatches are admitted immediately
        let next = t0 + Duration::from_millis(1_000);
        assert_eq!(p.required_delay(next), Duration::ZERO);
        p.record_dispatch(next);
        p.record_dispatch(next);
        assert_eq!(p.required_delay(next), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_windows_pruned() {
        let mut p = pacer(0, 10, 100);
        let t0 = Instant::now();
        for i in 0..5 {
            p.record_dispatch(t0 + Duration::from_millis(i * 100));
        }
        assert_eq!(p.tracked_windows(), 5);
        p.required_delay(t0 + Duration::from_millis(450));
        assert_eq!(p.tracked_windows(), 1);
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(random_jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            assert!(random_jitter(Duration::from_millis(50)) <= Duration::from_millis(50));
        }
    }
}
