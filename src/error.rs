//! Error taxonomy for the admission proxy.
//!
//! Every error that can terminate a request maps to exactly one HTTP status
//! via [`ProxyError::http_status`]. Parser-level errors (malformed request
//! body, malformed upstream headers) are deliberately *not* part of this
//! enum — those are recovered inline by the caller and never propagate.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Unified error type for the proxy's request path.
#[derive(Debug, Clone)]
pub enum ProxyError {
    /// Transport failure talking to upstream, or upstream returned 5xx.
    UpstreamConnection { detail: String },
    /// Request context deadline elapsed, or the upstream call itself timed out.
    UpstreamTimeout { elapsed: Duration },
    /// Reserved for breaker-adjacent downstream signals (distinct from `CircuitOpen`).
    UpstreamUnavailable { detail: String },
    /// The admission queue is saturated (C4's `-1` sentinel).
    RateLimitExceeded,
    /// The circuit breaker rejected the call without attempting it.
    CircuitOpen { failure_count: usize },
    /// Missing Host, directory traversal, or a non-Cerebras host handed to the LLM path.
    InvalidRequest { detail: String },
    /// No configured route matches the request's host (C8 only).
    RouteNotFound { host: String },
    /// A configuration invariant was violated and only surfaced at request time.
    Configuration { detail: String },
    /// Catch-all for anything else.
    Internal { detail: String },
}

impl ProxyError {
    /// Stable machine-readable code, used as the `error` field of the JSON error body.
    pub fn code(&self) -> u16 {
        match self {
            ProxyError::UpstreamConnection { .. } => 1,
            ProxyError::UpstreamTimeout { .. } => 2,
            ProxyError::UpstreamUnavailable { .. } => 3,
            ProxyError::RateLimitExceeded => 4,
            ProxyError::CircuitOpen { .. } => 5,
            ProxyError::InvalidRequest { .. } => 6,
            ProxyError::RouteNotFound { .. } => 9,
            ProxyError::Configuration { .. } => 7,
            ProxyError::Internal { .. } => 8,
        }
    }

    /// HTTP status projection per spec.md section 7's error taxonomy table
    /// (`RouteNotFound` per section 4.8, which the table itself omits).
    pub fn http_status(&self) -> StatusCode {
        match self {
            ProxyError::UpstreamConnection { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::UpstreamTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::UpstreamUnavailable { .. } => StatusCode::BAD_GATEWAY,
            ProxyError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ProxyError::CircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ProxyError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            ProxyError::RouteNotFound { .. } => StatusCode::NOT_FOUND,
            ProxyError::Configuration { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            ProxyError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn is_circuit_open(&self) -> bool {
        matches!(self, ProxyError::CircuitOpen { .. })
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ProxyError::UpstreamTimeout { .. })
    }

    pub fn is_rate_limit_exceeded(&self) -> bool {
        matches!(self, ProxyError::RateLimitExceeded)
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyError::UpstreamConnection { detail } => {
                write!(f, "upstream connection failure: {detail}")
            }
            ProxyError::UpstreamTimeout { elapsed } => {
                write!(f, "upstream timed out after {elapsed:?}")
            }
            ProxyError::UpstreamUnavailable { detail } => {
                write!(f, "upstream unavailable: {detail}")
            }
            ProxyError::RateLimitExceeded => write!(f, "admission queue full"),
            ProxyError::CircuitOpen { failure_count } => {
                write!(f, "circuit breaker open ({failure_count} recorded failures)")
            }
            ProxyError::InvalidRequest { detail } => write!(f, "invalid request: {detail}"),
            ProxyError::RouteNotFound { host } => write!(f, "No route found for host: {host}"),
            ProxyError::Configuration { detail } => write!(f, "configuration error: {detail}"),
            ProxyError::Internal { detail } => write!(f, "internal error: {detail}"),
        }
    }
}

impl std::error::Error for ProxyError {}

/// Wire shape for every error response: `{"error": <int>, "message": "...", "status": <http>}`.
#[derive(Serialize)]
struct ErrorBody {
    error: u16,
    message: String,
    status: u16,
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.http_status();
        let body = ErrorBody {
            error: self.code(),
            message: self.to_string(),
            status: status.as_u16(),
        };
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_projection_matches_taxonomy() {
        assert_eq!(
            ProxyError::UpstreamConnection { detail: "x".into() }.http_status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ProxyError::UpstreamTimeout { elapsed: Duration::from_secs(1) }.http_status(),
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(ProxyError::RateLimitExceeded.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            ProxyError::CircuitOpen { failure_count: 3 }.http_status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ProxyError::InvalidRequest { detail: "x".into() }.http_status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ProxyError::Configuration { detail: "x".into() }.http_status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            ProxyError::RouteNotFound { host: "x".into() }.http_status(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn predicates() {
        let e = ProxyError::CircuitOpen { failure_count: 1 };
        assert!(e.is_circuit_open());
        assert!(!e.is_timeout());
        assert!(!e.is_rate_limit_exceeded());
    }

    #[test]
    fn display_includes_detail() {
        let e = ProxyError::UpstreamConnection { detail: "connection reset".into() };
        assert!(e.to_string().contains("connection reset"));
    }
}
