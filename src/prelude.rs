//! Convenient re-exports of the proxy's core public types.

pub use crate::admission_queue::{AdmissionQueue, QueueEntry};
pub use crate::circuit_breaker::{CallError, CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use crate::compound_limiter::{Admission, CompoundLimiter, CompoundLimiterConfig};
pub use crate::config::ProxyConfig;
pub use crate::error::ProxyError;
pub use crate::headers::RateLimitHeaders;
pub use crate::leaky_bucket::LeakyBucketLimiter;
pub use crate::state::AppState;
pub use crate::token_estimate::TokenEstimate;
