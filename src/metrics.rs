//! In-memory metrics (A4) and health (A5) surfaces. Minimal by design — no
//! non-trivial invariants live here, this exists so the service is operable.
//!
//! Counters are registered into a `prometheus::Registry`, the same way
//! `flyingrobots-ninelives/ninelives-prometheus` wires its sink — bring your
//! own registry, register counters, render via the crate's text encoder.

use prometheus::{Encoder, IntCounter, Opts, Registry, TextEncoder};
use serde::Serialize;
use std::sync::Mutex;

struct Inner {
    registry: Registry,
    total_requests: IntCounter,
    rejected_rate_limited: IntCounter,
    rejected_queue_full: IntCounter,
    rejected_circuit_open: IntCounter,
}

impl Inner {
    fn new() -> Self {
        let registry = Registry::new();
        let total_requests = IntCounter::with_opts(Opts::new("proxy_requests_total", "Total admitted requests."))
            .expect("static counter opts must be valid");
        let rejected_rate_limited = IntCounter::with_opts(Opts::new(
            "proxy_rejected_rate_limited_total",
            "Requests rejected due to rate limiting.",
        ))
        .expect("static counter opts must be valid");
        let rejected_queue_full = IntCounter::with_opts(Opts::new(
            "proxy_rejected_queue_full_total",
            "Requests rejected because the admission queue was full.",
        ))
        .expect("static counter opts must be valid");
        let rejected_circuit_open = IntCounter::with_opts(Opts::new(
            "proxy_rejected_circuit_open_total",
            "Requests rejected because the circuit breaker was open.",
        ))
        .expect("static counter opts must be valid");

        registry.register(Box::new(total_requests.clone())).expect("name is unique within this registry");
        registry.register(Box::new(rejected_rate_limited.clone())).expect("name is unique within this registry");
        registry.register(Box::new(rejected_queue_full.clone())).expect("name is unique within this registry");
        registry.register(Box::new(rejected_circuit_open.clone())).expect("name is unique within this registry");

        Self { registry, total_requests, rejected_rate_limited, rejected_queue_full, rejected_circuit_open }
    }
}

pub struct Metrics {
    inner: Mutex<Inner>,
}

impl Metrics {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::new()) }
    }

    pub fn record_request(&self) {
        self.lock().total_requests.inc();
    }

    pub fn record_rejection(&self, reason: RejectionReason) {
        let inner = self.lock();
        match reason {
            RejectionReason::RateLimited => inner.rejected_rate_limited.inc(),
            RejectionReason::QueueFull => inner.rejected_queue_full.inc(),
            RejectionReason::CircuitOpen => inner.rejected_circuit_open.inc(),
        }
    }

    /// Zeroes the counters by rebuilding the registry. `prometheus::Counter`
    /// is deliberately one-directional (no `dec`/`reset`), so a fresh
    /// `Inner` is swapped in rather than mutating the existing counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        *inner = Inner::new();
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = self.lock();
        MetricsSnapshot {
            total_requests: inner.total_requests.get(),
            rejected_rate_limited: inner.rejected_rate_limited.get(),
            rejected_queue_full: inner.rejected_queue_full.get(),
            rejected_circuit_open: inner.rejected_circuit_open.get(),
        }
    }

    /// Renders the registered counters via `prometheus::TextEncoder`.
    pub fn render_prometheus(&self) -> String {
        let inner = self.lock();
        let metric_families = inner.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .expect("encoding gathered metric families must not fail");
        String::from_utf8(buffer).expect("prometheus text encoder emits valid utf8")
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy)]
pub enum RejectionReason {
    RateLimited,
    QueueFull,
    CircuitOpen,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub rejected_rate_limited: u64,
    pub rejected_queue_full: u64,
    pub rejected_circuit_open: u64,
}
