//! Shared application state, constructed once at startup and cloned (as an
//! `Arc`) into every request handler.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::compound_limiter::{CompoundLimiter, CompoundLimiterConfig};
use crate::config::ProxyConfig;
use crate::leaky_bucket::{BucketConfig, LeakyBucketLimiter};
use crate::metrics::Metrics;
use crate::routing::{HostRouter, ModelRouter};
use crate::sleeper::{Sleeper, TokioSleeper};
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub config: ProxyConfig,
    pub limiter: CompoundLimiter,
    pub breaker: CircuitBreaker,
    pub buckets: LeakyBucketLimiter,
    pub router: ModelRouter,
    pub routes: HostRouter,
    pub metrics: Metrics,
    pub http: reqwest::Client,
    /// Abstracts admission/bucket waits so tests can swap in an
    /// [`crate::sleeper::InstantSleeper`] or [`crate::sleeper::TrackingSleeper`].
    pub sleeper: Arc<dyn Sleeper>,
}

impl AppState {
    pub fn new(config: ProxyConfig) -> Self {
        let limiter_config = CompoundLimiterConfig {
            rpm_limit: config.cerebras_limits.rpm_limit,
            tpm_limit: config.cerebras_limits.tpm_limit,
            max_queue_depth: config.cerebras_limits.max_queue_depth,
            priority_threshold: config.cerebras_limits.priority_threshold,
            reset_buffer: config.cerebras_limits.rate_limits.reset_buffer(),
        };

        let patterns = config
            .rate_limits
            .iter()
            .map(|rl| (rl.domain.clone(), BucketConfig::new(rl.requests_per_second, rl.effective_capacity())))
            .collect();
        let default_bucket = BucketConfig::new(
            config.default_rate_limit.requests_per_second,
            config.default_rate_limit.effective_capacity(),
        );

        let router = ModelRouter::new(config.model_routes.clone(), config.cerebras_limits.upstream_base_url.clone());
        let routes = HostRouter::new(config.rate_limits.iter().map(|rl| (rl.domain.clone(), rl.target_url.clone())).collect());

        let http = reqwest::Client::builder()
            .timeout(config.cerebras_limits.request_timeout())
            .build()
            .expect("reqwest client with static TLS config must build");

        Self {
            limiter: CompoundLimiter::new(limiter_config),
            breaker: CircuitBreaker::new(
                "llm-upstream",
                CircuitBreakerConfig {
                    max_failures: 5,
                    reset_timeout: Duration::from_secs(60),
                    half_open_max_calls: 1,
                },
            ),
            buckets: LeakyBucketLimiter::new(patterns, default_bucket),
            router,
            routes,
            metrics: Metrics::new(),
            http,
            sleeper: Arc::new(TokioSleeper),
            config,
        }
    }

    /// Overrides the sleeper, used by tests that want to assert on admission
    /// delays without actually waiting for them.
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }
}
