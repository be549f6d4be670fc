//! Generic proxy handler (C8): host-keyed reverse proxy with leaky-bucket
//! limiting and structured JSON errors.

use super::forward;
use crate::error::ProxyError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, Method, Uri};
use axum::response::{IntoResponse, Response};
use std::net::SocketAddr;
use std::sync::Arc;

/// Any host not in `cerebras_limits.llm_hosts` lands here.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    method: Method,
    uri: Uri,
    mut headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.metrics.record_request();
    let deadline = server_timeout(&state);

    match tokio::time::timeout(deadline, run(&state, peer_addr, &method, &uri, &mut headers, body)).await {
        Ok(response) => response,
        Err(_) => ProxyError::UpstreamTimeout { elapsed: deadline }.into_response(),
    }
}

/// Overall per-request deadline for the generic path: the configured server
/// read timeout, reused here since per-domain routes carry no timeout of
/// their own.
fn server_timeout(state: &AppState) -> std::time::Duration {
    std::time::Duration::from_secs(state.config.server.read_timeout_secs)
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

    let Some(target_base_url) = state.routes.resolve(&host) else {
        return ProxyError::RouteNotFound { host }.into_response();
    };
    let target_base_url = target_base_url.to_string();

    let path = uri.path();
    if forward::has_directory_traversal(path) {
        return ProxyError::InvalidRequest { detail: "invalid path: directory traversal not allowed".into() }
            .into_response();
    }

    let delay = state.buckets.get_delay(&host);
    if !delay.is_zero() {
        state.sleeper.sleep(delay).await;
    }

    let mut forward_headers = headers.clone();
    forward::strip_hop_headers(&mut forward_headers);
    forward::inject_forwarded_headers(&mut forward_headers, peer_addr, &host);

    let path_and_query = uri.path_and_query().map(|p| p.as_str()).unwrap_or(path).to_string();
    let timeout = server_timeout(state);

    match forward::send(&state.http, method, &target_base_url, &path_and_query, &forward_headers, body, timeout).await
    {
        Ok(forwarded) => {
            if forwarded.status >= 500 {
                tracing::warn!(status = forwarded.status, %host, path = %path, "upstream returned server error");
            }
            let mut upstream_headers = forwarded.headers;
            forward::strip_hop_headers(&mut upstream_headers);

            let mut response = (
                axum::http::StatusCode::from_u16(forwarded.status).unwrap_or(axum::http::StatusCode::BAD_GATEWAY),
                forwarded.body,
            )
                .into_response();
            response.headers_mut().extend(upstream_headers);
            response
        }
        Err(err) => err.into_response(),
    }
}
