//! LLM proxy handler (C7): estimate tokens → admission → circuit-protected
//! forward → ingest response headers.

use super::forward;
use crate::compound_limiter::Admission;
use crate::error::ProxyError;
use crate::headers::{self as ratelimit_headers, HeaderLookup};
use crate::metrics::RejectionReason;
use crate::state::AppState;
use crate::token_estimate;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, Uri};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;

struct HeaderMapLookup<'a>(&'a HeaderMap);

impl<'a> HeaderLookup for HeaderMapLookup<'a> {
    fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).and_then(|v| v.to_str().ok())
    }
}

/// `POST /v1/chat/completions` (or any path) with `Host` in the configured
/// LLM host set.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.record_request();
    let request_timeout = state.config.cerebras_limits.request_timeout();

    match tokio::time::timeout(request_timeout, run(&state, peer_addr, &method, &uri, &mut headers, body)).await {
        Ok(response) => response,
        Err(_) => ProxyError::UpstreamTimeout { elapsed: request_timeout }.into_response(),
    }
}

async fn run(
    state: &AppState,
    peer_addr: SocketAddr,
    method: &Method,
    uri: &Uri,
    headers: &mut HeaderMap,
    body: Bytes,
) -> Response {
    let host = match headers.get(axum::http::header::HOST).and_then(|v| v.to_str().ok()) {
        Some(h) => crate::host::normalize(h),
        None => return ProxyError::InvalidRequest { detail: "missing Host header".into() }.into_response(),
    };

    if !crate::host::matches_any(&host, &state.config.cerebras_limits.llm_hosts) {
        return ProxyError::InvalidRequest { detail: "Not a Cerebras request".into() }.into_response();
    }

    // Step 1 & 2: estimate tokens (and extract the routed model) from one parse.
    let parsed = token_estimate::parse_request(&body);
    let total_tokens = parsed.estimate.total();

    // Step 3: admit.
    let admission = if state.config.cerebras_limits.rate_limits.use_headers {
        state.limiter.check_request_with_dynamic_queue(&peer_addr.to_string(), total_tokens)
    } else {
        state.limiter.check_request_with_queue(&peer_addr.to_string(), total_tokens)
    };

    // Step 4: observability headers. Built before the admission match so
    // they ride out on every LLM-path response, including early rejections.
    let mut response_headers = HeaderMap::new();
    response_headers.insert(
        HeaderName::from_static("x-ratelimit-limit-rpm"),
        HeaderValue::from(state.limiter.rpm_limit()),
    );
    response_headers.insert(
        HeaderName::from_static("x-ratelimit-limit-tpm"),
        HeaderValue::from(state.limiter.tpm_limit()),
    );
    response_headers.insert(
        HeaderName::from_static("x-ratelimit-queue-length"),
        HeaderValue::from(state.limiter.queue_length() as u64),
    );
    let breaker_stats = state.breaker.stats().await;
    if let Ok(v) = HeaderValue::from_str(breaker_stats.state.as_str()) {
        response_headers.insert(HeaderName::from_static("x-circuitbreaker-state"), v);
    }
    response_headers.insert(
        HeaderName::from_static("x-circuitbreaker-failures"),
        HeaderValue::from(breaker_stats.failure_count as u64),
    );

    match admission {
        Admission::QueueFull => {
            state.metrics.record_rejection(RejectionReason::QueueFull);
            let mut response = ProxyError::RateLimitExceeded.into_response();
            response.headers_mut().insert("retry-after", HeaderValue::from_static("60"));
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-ratelimit-reason"), HeaderValue::from_static("queue_full"));
            response.headers_mut().extend(response_headers);
            return response;
        }
        Admission::Delay(delay) => {
            state.metrics.record_rejection(RejectionReason::RateLimited);
            if let Ok(value) = HeaderValue::from_str(&format!("{delay:?}")) {
                response_headers.insert(HeaderName::from_static("x-ratelimit-delay"), value);
            }
            response_headers.insert(
                HeaderName::from_static("x-ratelimit-reason"),
                HeaderValue::from_static("rate_limited"),
            );
            state.sleeper.sleep(delay).await;
        }
        Admission::Immediate => {}
    }

    // Step 5: circuit-protected forward.
    let target_base_url = state.router.resolve(parsed.model.as_deref()).to_string();
    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or(uri.path()).to_string();

    let mut forward_headers = headers.clone();
    forward::strip_hop_headers(&mut forward_headers);
    forward::inject_forwarded_headers(&mut forward_headers, peer_addr, &host);

    let timeout = state.config.cerebras_limits.request_timeout();
    let outcome = state
        .breaker
        .call(|| async {
            let forwarded =
                forward::send(&state.http, method, &target_base_url, &path_and_query, &forward_headers, body, timeout)
                    .await?;
            if forwarded.status >= 500 {
                Err(ProxyError::UpstreamConnection { detail: format!("upstream returned {}", forwarded.status) })
            } else {
                Ok(forwarded)
            }
        })
        .await;

    match outcome {
        Ok(forwarded) => {
            // Step 6: ingest response headers; parse failures never abort the response.
            if let Ok(parsed_headers) = ratelimit_headers::parse(&HeaderMapLookup(&forwarded.headers)) {
                state.limiter.update_from_headers(parsed_headers);
            }

            let mut upstream_headers = forwarded.headers;
            forward::strip_hop_headers(&mut upstream_headers);

            let mut response = (
                axum::http::StatusCode::from_u16(forwarded.status).unwrap_or(axum::http::StatusCode::BAD_GATEWAY),
                forwarded.body,
            )
                .into_response();
            response.headers_mut().extend(upstream_headers);
            response.headers_mut().extend(response_headers);
            response
        }
        Err(crate::circuit_breaker::CallError::CircuitOpen(open)) => {
            state.metrics.record_rejection(RejectionReason::CircuitOpen);
            let mut response = ProxyError::CircuitOpen { failure_count: open.failure_count }.into_response();
            response.headers_mut().insert("retry-after", HeaderValue::from_static("60"));
            response.headers_mut().insert(
                HeaderName::from_static("x-circuitbreaker-reason"),
                HeaderValue::from_static("circuit_open"),
            );
            response.headers_mut().extend(response_headers);
            response
        }
        Err(crate::circuit_breaker::CallError::Inner(err)) => {
            let mut response = err.into_response();
            response
                .headers_mut()
                .insert(HeaderName::from_static("x-circuitbreaker-reason"), HeaderValue::from_static("upstream_error"));
            response.headers_mut().extend(response_headers);
            response
        }
    }
}
