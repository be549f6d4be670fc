//! Compound RPM+TPM limiter (C4): sliding-window admission with static and
//! header-driven dynamic modes, backed by the priority admission queue.

use crate::admission_queue::{AdmissionQueue, QueueEntry};
use crate::headers::RateLimitHeaders;
use crate::window::SlidingWindow;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Dynamic state is authoritative only within this many seconds of the last
/// header ingestion; otherwise the limiter falls back to static mode.
pub const STALENESS_THRESHOLD: Duration = Duration::from_secs(5 * 60);

/// Divisor applied to `current_tpm_limit` when the dynamic window's reset
/// has passed: a deliberate under-commit to avoid stampeding the upstream on
/// the first tick after reset. Must stay ≤ 1 of the real limit to be safe.
const CONSERVATIVE_REFILL_DIVISOR: i64 = 20;

#[derive(Debug, Clone)]
pub struct CompoundLimiterConfig {
    pub rpm_limit: i64,
    pub tpm_limit: i64,
    pub max_queue_depth: usize,
    pub priority_threshold: f64,
    pub reset_buffer: Duration,
}

impl Default for CompoundLimiterConfig {
    fn default() -> Self {
        Self {
            rpm_limit: 30,
            tpm_limit: 60_000,
            max_queue_depth: 100,
            priority_threshold: 0.7,
            reset_buffer: Duration::from_millis(100),
        }
    }
}

#[derive(Debug)]
struct DynamicState {
    current_tpm_limit: i64,
    current_tpm_remaining: i64,
    next_tpm_reset: Instant,
    last_header_update: Instant,
}

struct Inner {
    rpm_window: SlidingWindow,
    tpm_window: SlidingWindow,
    dynamic: Option<DynamicState>,
}

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Admission {
    Immediate,
    Delay(Duration),
    QueueFull,
}

impl Admission {
    /// Projects the result onto the wire sentinel the spec describes: 0 for
    /// immediate, the delay in whole seconds otherwise, -1 for queue full.
    pub fn as_seconds_sentinel(&self) -> i64 {
        match self {
            Admission::Immediate => 0,
            Admission::Delay(d) => d.as_secs().max(1) as i64,
            Admission::QueueFull => -1,
        }
    }
}

pub struct CompoundLimiter {
    config: CompoundLimiterConfig,
    inner: Mutex<Inner>,
    queue: AdmissionQueue,
}

impl CompoundLimiter {
    pub fn new(config: CompoundLimiterConfig) -> Self {
        let queue = AdmissionQueue::new(config.max_queue_depth);
        Self {
            inner: Mutex::new(Inner {
                rpm_window: SlidingWindow::with_default_window(),
                tpm_window: SlidingWindow::with_default_window(),
                dynamic: None,
            }),
            queue,
            config,
        }
    }

    /// Unconditional admission check: adds `tokens` to the TPM window first,
    /// rejects (60s) if either window is over budget, otherwise records the
    /// request on the RPM window and admits immediately.
    pub fn check_request(&self, tokens: i64) -> Duration {
        self.check_request_at(tokens, Instant::now())
    }

    pub fn check_request_at(&self, tokens: i64, now: Instant) -> Duration {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.tpm_window.add(tokens, now);
        if inner.tpm_window.sum_at(now) > self.config.tpm_limit {
            return Duration::from_secs(60);
        }
        if inner.rpm_window.sum_at(now) >= self.config.rpm_limit {
            return Duration::from_secs(60);
        }
        inner.rpm_window.add(1, now);
        Duration::ZERO
    }

    /// Static admission with queueing fallback.
    pub fn check_request_with_queue(&self, id: &str, tokens: i64) -> Admission {
        self.check_request_with_queue_at(id, tokens, Instant::now())
    }

    pub fn check_request_with_queue_at(&self, id: &str, tokens: i64, now: Instant) -> Admission {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let rpm_sum = inner.rpm_window.sum_at(now);
        let tpm_sum = inner.tpm_window.sum_at(now);

        if rpm_sum < self.config.rpm_limit && tpm_sum + tokens <= self.config.tpm_limit {
            inner.rpm_window.add(1, now);
            inner.tpm_window.add(tokens, now);
            return Admission::Immediate;
        }

        let pressure = (rpm_sum as f64 / self.config.rpm_limit as f64)
            .max(tpm_sum as f64 / self.config.tpm_limit as f64);
        drop(inner);

        let priority = self.smart_priority(pressure, tokens);
        let entry = QueueEntry::new(id, tokens, priority, now, None);
        if self.queue.enqueue(entry) {
            Admission::Delay(Duration::from_secs(60))
        } else {
            Admission::QueueFull
        }
    }

    /// Favours small requests under pressure, penalizes large ones; neutral
    /// under low pressure.
    fn smart_priority(&self, pressure: f64, tokens: i64) -> f64 {
        if pressure > self.config.priority_threshold {
            if tokens < 1000 {
                2.0
            } else if tokens > 5000 {
                0.5
            } else {
                1.0
            }
        } else {
            1.0
        }
    }

    /// Ingests a parsed header record. Idempotent, last writer wins.
    pub fn update_from_headers(&self, headers: RateLimitHeaders) {
        self.update_from_headers_at(headers, Instant::now());
    }

    pub fn update_from_headers_at(&self, headers: RateLimitHeaders, now: Instant) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.dynamic = Some(DynamicState {
            current_tpm_limit: headers.tpm_limit,
            current_tpm_remaining: headers.tpm_remaining,
            next_tpm_reset: now + headers.tpm_reset,
            last_header_update: now,
        });
    }

    /// Dynamic admission. Delegates to the static path whenever the dynamic
    /// state is stale or was never set.
    pub fn check_request_with_dynamic_queue(&self, id: &str, tokens: i64) -> Admission {
        self.check_request_with_dynamic_queue_at(id, tokens, Instant::now())
    }

    pub fn check_request_with_dynamic_queue_at(&self, id: &str, tokens: i64, now: Instant) -> Admission {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let is_stale = match &inner.dynamic {
            None => true,
            Some(d) => now.saturating_duration_since(d.last_header_update) > STALENESS_THRESHOLD,
        };
        if is_stale {
            drop(inner);
            return self.check_request_with_queue_at(id, tokens, now);
        }

        let dynamic = inner.dynamic.as_mut().expect("checked non-stale above");
        if tokens <= dynamic.current_tpm_remaining {
            dynamic.current_tpm_remaining -= tokens;
            return Admission::Immediate;
        }
        if dynamic.next_tpm_reset <= now {
            dynamic.current_tpm_remaining = dynamic.current_tpm_limit / CONSERVATIVE_REFILL_DIVISOR;
            return Admission::Immediate;
        }
        let wait = dynamic.next_tpm_reset.saturating_duration_since(now) + self.config.reset_buffer;
        Admission::Delay(wait)
    }

    pub fn queue_length(&self) -> usize {
        self.queue.len()
    }

    pub fn rpm_limit(&self) -> i64 {
        self.config.rpm_limit
    }

    pub fn tpm_limit(&self) -> i64 {
        self.config.tpm_limit
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(rpm: i64, tpm: i64, max_queue: usize) -> CompoundLimiterConfig {
        CompoundLimiterConfig { rpm_limit: rpm, tpm_limit: tpm, max_queue_depth: max_queue, ..Default::default() }
    }

    #[test]
    fn s2_rpm_cap() {
        let limiter = CompoundLimiter::new(config(2, 1_000_000, 100));
        let now = Instant::now();
        assert_eq!(limiter.check_request_at(100, now), Duration::ZERO);
        assert_eq!(limiter.check_request_at(100, now), Duration::ZERO);
        assert_eq!(limiter.check_request_at(100, now), Duration::from_secs(60));
    }

    #[test]
    fn s3_tpm_cap() {
        let limiter = CompoundLimiter::new(config(1000, 1000, 100));
        let now = Instant::now();
        assert_eq!(limiter.check_request_at(600, now), Duration::ZERO);
        assert_eq!(limiter.check_request_at(600, now), Duration::from_secs(60));
    }

    #[test]
    fn s4_queue_fill_and_reject() {
        let limiter = CompoundLimiter::new(config(1, 1000, 2));
        let now = Instant::now();

        assert_eq!(limiter.check_request_with_queue_at("a", 100, now), Admission::Immediate);
        assert!(matches!(
            limiter.check_request_with_queue_at("b", 100, now),
            Admission::Delay(_)
        ));
        assert!(matches!(
            limiter.check_request_with_queue_at("c", 100, now),
            Admission::Delay(_)
        ));
        assert_eq!(limiter.check_request_with_queue_at("d", 100, now), Admission::QueueFull);
    }

    #[test]
    fn s5_header_ingest_then_dynamic_admit() {
        let limiter = CompoundLimiter::new(config(30, 60_000, 100));
        let now = Instant::now();
        limiter.update_from_headers_at(
            RateLimitHeaders { tpm_limit: 1000, tpm_remaining: 50, tpm_reset: Duration::from_secs(10) },
            now,
        );

        match limiter.check_request_with_dynamic_queue_at("x", 100, now) {
            Admission::Delay(d) => {
                assert!(d >= Duration::from_millis(9_900) && d <= Duration::from_millis(10_200));
            }
            other => panic!("expected Delay, got {other:?}"),
        }
    }

    #[test]
    fn dynamic_mode_admits_when_within_remaining() {
        let limiter = CompoundLimiter::new(config(30, 60_000, 100));
        let now = Instant::now();
        limiter.update_from_headers_at(
            RateLimitHeaders { tpm_limit: 1000, tpm_remaining: 500, tpm_reset: Duration::from_secs(10) },
            now,
        );
        assert_eq!(limiter.check_request_with_dynamic_queue_at("x", 100, now), Admission::Immediate);
    }

    #[test]
    fn dynamic_mode_falls_back_to_static_when_stale() {
        let limiter = CompoundLimiter::new(config(30, 60_000, 100));
        let now = Instant::now();
        limiter.update_from_headers_at(
            RateLimitHeaders { tpm_limit: 1000, tpm_remaining: 0, tpm_reset: Duration::from_secs(10) },
            now,
        );
        let later = now + STALENESS_THRESHOLD + Duration::from_secs(1);
        assert_eq!(limiter.check_request_with_dynamic_queue_at("x", 100, later), Admission::Immediate);
    }

    #[test]
    fn dynamic_mode_conservative_refill_after_reset() {
        let limiter = CompoundLimiter::new(config(30, 60_000, 100));
        let now = Instant::now();
        limiter.update_from_headers_at(
            RateLimitHeaders { tpm_limit: 1000, tpm_remaining: 0, tpm_reset: Duration::from_secs(10) },
            now,
        );
        let after_reset = now + Duration::from_secs(11);
        assert_eq!(
            limiter.check_request_with_dynamic_queue_at("x", 40, after_reset),
            Admission::Immediate
        );
    }

    #[test]
    fn smart_priority_boosts_small_requests_under_pressure() {
        let limiter = CompoundLimiter::new(config(10, 1_000_000, 100));
        assert_eq!(limiter.smart_priority(0.9, 500), 2.0);
        assert_eq!(limiter.smart_priority(0.9, 6000), 0.5);
        assert_eq!(limiter.smart_priority(0.9, 3000), 1.0);
        assert_eq!(limiter.smart_priority(0.1, 500), 1.0);
    }

    #[test]
    fn admission_monotonicity_on_immediate_success() {
        let limiter = CompoundLimiter::new(config(30, 60_000, 100));
        let now = Instant::now();
        assert_eq!(limiter.check_request_with_queue_at("a", 100, now), Admission::Immediate);
        let inner = limiter.inner.lock().unwrap();
        assert_eq!(inner.rpm_window.sum_at(now), 1);
        assert_eq!(inner.tpm_window.sum_at(now), 100);
    }
}
