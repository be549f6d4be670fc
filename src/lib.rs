#![forbid(unsafe_code)]

//! # cerebras-admission-proxy
//!
//! A reverse proxy in front of third-party LLM inference APIs (Cerebras-style)
//! that enforces client-side rate limits, smooths bursts, and protects
//! against cascading upstream failures.
//!
//! Three subsystems do the real work:
//!
//! - [`leaky_bucket`] + [`window`]: a per-domain leaky bucket for generic
//!   traffic, and the sliding-window primitive the compound limiter is built
//!   from.
//! - [`compound_limiter`] + [`admission_queue`] + [`headers`]: the RPM/TPM
//!   limiter for the LLM path, in both static and upstream-header-driven
//!   dynamic modes, backed by a bounded priority admission queue.
//! - [`circuit_breaker`]: a three-state failure detector with half-open
//!   probing, wrapped around every upstream forward.
//!
//! [`proxy`] wires these into the two HTTP entry points ([`proxy::llm`] and
//! [`proxy::generic`]); [`server`] wires those into a running `axum` service.

pub mod admission_queue;
pub mod circuit_breaker;
pub mod clock;
pub mod compound_limiter;
pub mod config;
pub mod error;
pub mod headers;
pub mod host;
pub mod leaky_bucket;
pub mod metrics;
pub mod proxy;
pub mod routing;
pub mod server;
pub mod sleeper;
pub mod state;
pub mod token_estimate;
pub mod window;

pub mod prelude;
