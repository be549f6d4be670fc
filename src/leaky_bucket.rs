//! Per-domain leaky bucket (C2): a generic RPS limiter with burst capacity.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Bucket {
    rate: f64,
    capacity: i64,
    tokens: i64,
    last_leak: Instant,
    total_requests: u64,
    delayed_requests: u64,
}

impl Bucket {
    fn new(rate: f64, capacity: i64, now: Instant) -> Self {
        Self { rate, capacity, tokens: capacity, last_leak: now, total_requests: 0, delayed_requests: 0 }
    }

    /// Leaks tokens back in proportion to elapsed time, then either admits
    /// immediately (returning zero delay) or reports the suggested wait.
    fn get_delay(&mut self, now: Instant) -> Duration {
        let elapsed = now.saturating_duration_since(self.last_leak).as_secs_f64();
        let tokens_to_leak = (elapsed * self.rate).floor() as i64;
        if tokens_to_leak > 0 {
            self.tokens = (self.tokens + tokens_to_leak).min(self.capacity);
            self.last_leak = now;
        }

        self.total_requests += 1;
        if self.tokens > 0 {
            self.tokens -= 1;
            Duration::ZERO
        } else {
            self.delayed_requests += 1;
            Duration::from_secs_f64(1.0 / self.rate)
        }
    }

    fn delay_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.delayed_requests as f64 / self.total_requests as f64 * 100.0
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BucketConfig {
    pub requests_per_second: f64,
    pub capacity: i64,
}

impl BucketConfig {
    pub fn new(requests_per_second: f64, capacity: i64) -> Self {
        Self { requests_per_second, capacity }
    }

    fn default_capacity(requests_per_second: f64) -> Self {
        Self { requests_per_second, capacity: (2.0 * requests_per_second).ceil() as i64 }
    }
}

impl Default for BucketConfig {
    fn default() -> Self {
        Self { requests_per_second: 1.0, capacity: 1 }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BucketMetrics {
    pub current_tokens: i64,
    pub total_requests: u64,
    pub delayed_requests: u64,
    pub delay_rate: f64,
}

/// Domain-keyed leaky bucket registry with exact then `*.suffix` matching,
/// falling back to a default bucket for unconfigured domains.
pub struct LeakyBucketLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    patterns: Vec<(String, BucketConfig)>,
    default_config: BucketConfig,
}

impl LeakyBucketLimiter {
    pub fn new(patterns: Vec<(String, BucketConfig)>, default_config: BucketConfig) -> Self {
        Self { buckets: Mutex::new(HashMap::new()), patterns, default_config }
    }

    /// Resolves which configured pattern (if any) governs `domain`. Exact
    /// match wins, then the first matching `*.suffix` pattern, in
    /// configuration order (the pattern set is expected to be small).
    fn resolve_config(&self, domain: &str) -> BucketConfig {
        for (pattern, config) in &self.patterns {
            if pattern == domain {
                return *config;
            }
        }
        for (pattern, config) in &self.patterns {
            if let Some(suffix) = pattern.strip_prefix("*.") {
                if domain.ends_with(suffix) {
                    return *config;
                }
            }
        }
        self.default_config
    }

    /// Computes the suggested wait before `domain` may proceed, mutating the
    /// bucket's token count and counters as a side effect.
    pub fn get_delay(&self, domain: &str) -> Duration {
        self.get_delay_at(domain, Instant::now())
    }

    pub fn get_delay_at(&self, domain: &str, now: Instant) -> Duration {
        let mut buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        let bucket = buckets.entry(domain.to_string()).or_insert_with(|| {
            let config = self.resolve_config(domain);
            Bucket::new(config.requests_per_second, config.capacity, now)
        });
        bucket.get_delay(now)
    }

    pub fn metrics_for(&self, domain: &str) -> Option<BucketMetrics> {
        let buckets = self.buckets.lock().unwrap_or_else(|p| p.into_inner());
        buckets.get(domain).map(|b| BucketMetrics {
            current_tokens: b.tokens,
            total_requests: b.total_requests,
            delayed_requests: b.delayed_requests,
            delay_rate: b.delay_rate(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn s1_leaky_bucket_burst() {
        let limiter = LeakyBucketLimiter::new(vec![], BucketConfig::new(5.0, 10));
        let t0 = Instant::now();

        for _ in 0..10 {
            assert_eq!(limiter.get_delay_at("x.example.com", t0), Duration::ZERO);
        }

        let delay = limiter.get_delay_at("x.example.com", t0);
        assert!(delay >= Duration::from_millis(190) && delay <= Duration::from_millis(210));

        let later = t0 + Duration::from_secs(1);
        assert_eq!(limiter.get_delay_at("x.example.com", later), Duration::ZERO);
    }

    #[test]
    fn wildcard_pattern_matches_suffix() {
        let limiter = LeakyBucketLimiter::new(
            vec![("*.example.com".to_string(), BucketConfig::new(5.0, 10))],
            BucketConfig::default(),
        );
        let t0 = Instant::now();
        for _ in 0..10 {
            assert_eq!(limiter.get_delay_at("api.example.com", t0), Duration::ZERO);
        }
        assert!(limiter.get_delay_at("api.example.com", t0) > Duration::ZERO);
    }

    #[test]
    fn unconfigured_domain_uses_default_bucket() {
        let limiter = LeakyBucketLimiter::new(vec![], BucketConfig::default());
        let t0 = Instant::now();
        assert_eq!(limiter.get_delay_at("unknown.example.org", t0), Duration::ZERO);
        assert!(limiter.get_delay_at("unknown.example.org", t0) > Duration::ZERO);
    }

    #[test]
    fn tokens_never_exceed_capacity() {
        let limiter = LeakyBucketLimiter::new(vec![], BucketConfig::new(1.0, 3));
        let t0 = Instant::now();
        limiter.get_delay_at("x", t0 + Duration::from_secs(1000));
        let metrics = limiter.metrics_for("x").unwrap();
        assert!(metrics.current_tokens <= 3);
    }

    #[test]
    fn default_capacity_is_ceil_twice_rate() {
        let config = BucketConfig::default_capacity(2.5);
        assert_eq!(config.capacity, 5);
    }
}
