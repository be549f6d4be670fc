//! Three-state circuit breaker guarding the upstream forward.
//!
//! Unlike the lock-free atomics breaker this crate's lineage normally uses,
//! this breaker is built around a single `tokio::sync::RwLock<Inner>`: reads
//! (`state`, `stats`) take the read lock, admission and outcome recording take
//! the write lock. Admission and recording are two distinct lock acquisitions
//! separated by the caller's operation, so the lock is never held across a
//! network round-trip.

use crate::clock::{Clock, MonotonicClock};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
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

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub max_failures: usize,
    pub reset_timeout: Duration,
    pub half_open_max_calls: usize,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            max_failures: 5,
            reset_timeout: Duration::from_secs(60),
            half_open_max_calls: 1,
        }
    }
}

/// Sentinel returned when the breaker rejects a call without attempting it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitOpen {
    pub failure_count: usize,
}

#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    pub failure_count: usize,
    pub half_open_attempts: usize,
}

struct Inner {
    state: CircuitState,
    failure_count: usize,
    last_failure_millis: u64,
    half_open_attempts: usize,
    half_open_successes: usize,
}

/// Async callback invoked (without blocking the caller) on every state transition.
pub type TransitionCallback = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

pub struct CircuitBreaker {
    name: String,
    inner: RwLock<Inner>,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    on_transition: Option<TransitionCallback>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            inner: RwLock::new(Inner {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_millis: 0,
                half_open_attempts: 0,
                half_open_successes: 0,
            }),
            config,
            clock: Arc::new(MonotonicClock::default()),
            on_transition: None,
        }
    }

    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn with_transition_callback(mut self, callback: TransitionCallback) -> Self {
        self.on_transition = Some(callback);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current state. Takes only the read lock.
    pub async fn state(&self) -> CircuitState {
        self.inner.read().await.state
    }

    /// Snapshot of breaker counters. Takes only the read lock.
    pub async fn stats(&self) -> CircuitBreakerStats {
        let inner = self.inner.read().await;
        CircuitBreakerStats {
            state: inner.state,
            failure_count: inner.failure_count,
            half_open_attempts: inner.half_open_attempts,
        }
    }

    /// Forces CLOSED, clearing all counters.
    pub async fn reset(&self) {
        let mut inner = self.inner.write().await;
        let from = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_millis = 0;
        inner.half_open_attempts = 0;
        inner.half_open_successes = 0;
        drop(inner);
        self.notify_transition(from, CircuitState::Closed);
    }

    /// Runs `f` under breaker protection. Returns `Err(CircuitOpen)` immediately
    /// without invoking `f` if the breaker rejects the call.
    pub async fn call<T, E, Fut, F>(&self, f: F) -> Result<T, CallError<E>>
    where
        Fut: Future<Output = Result<T, E>>,
        F: FnOnce() -> Fut,
    {
        self.admit().await?;
        let result = f().await;
        self.record(result.is_ok()).await;
        result.map_err(CallError::Inner)
    }

    /// Admission check only: write lock, may transition OPEN → HALF_OPEN.
    async fn admit<E>(&self) -> Result<(), CallError<E>> {
        let mut inner = self.inner.write().await;
        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let now = self.clock.now_millis();
                let elapsed = now.saturating_sub(inner.last_failure_millis);
                if elapsed >= self.config.reset_timeout.as_millis() as u64 {
                    let from = inner.state;
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_attempts = 1;
                    inner.half_open_successes = 0;
                    drop(inner);
                    self.notify_transition(from, CircuitState::HalfOpen);
                    Ok(())
                } else {
                    Err(CallError::CircuitOpen(CircuitOpen { failure_count: inner.failure_count }))
                }
            }
            CircuitState::HalfOpen => {
                if inner.half_open_attempts >= self.config.half_open_max_calls {
                    Err(CallError::CircuitOpen(CircuitOpen { failure_count: inner.failure_count }))
                } else {
                    inner.half_open_attempts += 1;
                    Ok(())
                }
            }
        }
    }

    /// Outcome recording: a second, independent write-lock acquisition.
    async fn record(&self, success: bool) {
        let mut inner = self.inner.write().await;
        let from = inner.state;
        match (from, success) {
            (CircuitState::Closed, true) => {
                inner.failure_count = 0;
            }
            (CircuitState::Closed, false) => {
                inner.failure_count += 1;
                if inner.failure_count >= self.config.max_failures {
                    inner.state = CircuitState::Open;
                    inner.last_failure_millis = self.clock.now_millis();
                    drop(inner);
                    self.notify_transition(from, CircuitState::Open);
                    return;
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_max_calls {
                    inner.state = CircuitState::Closed;
                    inner.failure_count = 0;
                    drop(inner);
                    self.notify_transition(from, CircuitState::Closed);
                    return;
                }
            }
            (CircuitState::HalfOpen, false) => {
                inner.failure_count += 1;
                inner.state = CircuitState::Open;
                inner.last_failure_millis = self.clock.now_millis();
                drop(inner);
                self.notify_transition(from, CircuitState::Open);
                return;
            }
            (CircuitState::Open, _) => {
                // Recording against a breaker that moved back to OPEN between
                // admission and recording (a racing caller lost the half-open
                // slot); nothing to update.
            }
        }
    }

    fn notify_transition(&self, from: CircuitState, to: CircuitState) {
        if from == to {
            return;
        }
        if let Some(cb) = self.on_transition.clone() {
            tokio::spawn(async move {
                cb(from, to);
            });
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallError<E> {
    CircuitOpen(CircuitOpen),
    Inner(E),
}

impl<E> CallError<E> {
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, CallError::CircuitOpen(_))
    }
}

impl<E: std::fmt::Display> std::fmt::Display for CallError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallError::CircuitOpen(c) => {
                write!(f, "circuit open ({} recorded failures)", c.failure_count)
            }
            CallError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::fmt::Debug + std::fmt::Display> std::error::Error for CallError<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Debug, Clone)]
    struct ManualClock {
        now: Arc<AtomicU64>,
    }

    impl ManualClock {
        fn new() -> Self {
            Self { now: Arc::new(AtomicU64::new(0)) }
        }

        fn advance(&self, millis: u64) {
            self.now.fetch_add(millis, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now_millis(&self) -> u64 {
            self.now.load(Ordering::SeqCst)
        }
    }

    fn config(max_failures: usize, reset_timeout: Duration, half_open_max_calls: usize) -> CircuitBreakerConfig {
        CircuitBreakerConfig { max_failures, reset_timeout, half_open_max_calls }
    }

    #[tokio::test]
    async fn starts_closed_and_admits() {
        let breaker = CircuitBreaker::new("llm", config(2, Duration::from_millis(100), 2));
        let result = breaker.call(|| async { Ok::<_, &'static str>(1) }).await;
        assert_eq!(result.unwrap(), 1);
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn opens_after_max_failures() {
        let breaker = CircuitBreaker::new("llm", config(2, Duration::from_secs(60), 1));
        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        let result = breaker.call(|| async { Ok::<_, &'static str>(1) }).await;
        assert!(result.unwrap_err().is_circuit_open());
    }

    #[tokio::test]
    async fn s6_breaker_cycle() {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new("llm", config(2, Duration::from_millis(100), 2))
            .with_clock(clock.clone());

        for _ in 0..2 {
            let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(breaker.state().await, CircuitState::Open);

        clock.advance(150);
        let r1 = breaker.call(|| async { Ok::<_, &'static str>(()) }).await;
        assert!(r1.is_ok());
        assert_eq!(breaker.state().await, CircuitState::HalfOpen);

        let r2 = breaker.call(|| async { Ok::<_, &'static str>(()) }).await;
        assert!(r2.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_returns_to_open() {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::new("llm", config(1, Duration::from_millis(50), 2))
            .with_clock(clock.clone());

        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        clock.advance(60);
        let _ = breaker.call(|| async { Err::<(), _>("boom again") }).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn reset_forces_closed() {
        let breaker = CircuitBreaker::new("llm", config(1, Duration::from_secs(60), 1));
        let _ = breaker.call(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(breaker.state().await, CircuitState::Open);
        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
        assert_eq!(breaker.stats().await.failure_count, 0);
    }
}
