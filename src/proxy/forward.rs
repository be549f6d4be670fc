//! Shared request-forwarding plumbing used by both the LLM (C7) and generic
//! (C8) proxy handlers: hop-header stripping, `X-Forwarded-*` injection, and
//! upstream transport-failure classification.

use crate::error::ProxyError;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method};
use std::net::SocketAddr;
use std::time::Duration;

/// Headers that must never be forwarded verbatim to the next hop.
const HOP_HEADERS: &[&str] =
    &["connection", "keep-alive", "proxy-authenticate", "proxy-authorization", "te", "trailers", "transfer-encoding", "upgrade"];

pub fn strip_hop_headers(headers: &mut HeaderMap) {
    for name in HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Sets `X-Forwarded-Host`, `X-Forwarded-Proto`, and appends to
/// `X-Forwarded-For` per the client's peer address.
pub fn inject_forwarded_headers(headers: &mut HeaderMap, peer_addr: SocketAddr, original_host: &str) {
    let xff = HeaderName::from_static("x-forwarded-for");
    let xfp = HeaderName::from_static("x-forwarded-proto");
    let xfh = HeaderName::from_static("x-forwarded-host");

    let peer_ip = peer_addr.ip().to_string();
    if let Some(existing) = headers.get(&xff).and_then(|v| v.to_str().ok()) {
        let combined = format!("{existing}, {peer_ip}");
        if let Ok(v) = HeaderValue::from_str(&combined) {
            headers.insert(xff, v);
        }
    } else if let Ok(v) = HeaderValue::from_str(&peer_ip) {
        headers.insert(xff, v);
    }

    if !headers.contains_key(&xfp) {
        headers.insert(xfp, HeaderValue::from_static("http"));
    }

    if !original_host.is_empty() {
        if let Ok(v) = HeaderValue::from_str(original_host) {
            headers.insert(xfh, v);
        }
    }
}

/// `true` if `path` contains a `..` segment — directory traversal is
/// rejected before the request is ever forwarded.
pub fn has_directory_traversal(path: &str) -> bool {
    path.split('/').any(|segment| segment == "..")
}

pub struct ForwardedResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: axum::body::Bytes,
}

/// Sends `body` to `target_base_url` + `path_and_query`, with `headers`
/// already stripped of hop-by-hop fields and carrying `X-Forwarded-*`.
///
/// Classifies transport failures: a context/client timeout yields
/// `UpstreamTimeout`, anything else yields `UpstreamConnection`. A
/// successfully-received response (including upstream 5xx) is always `Ok`;
/// the caller decides how a 5xx status affects the circuit breaker.
pub async fn send(
    client: &reqwest::Client,
    method: &Method,
    target_base_url: &str,
    path_and_query: &str,
    headers: &HeaderMap,
    body: axum::body::Bytes,
    timeout: Duration,
) -> Result<ForwardedResponse, ProxyError> {
    let url = format!("{}{}", target_base_url.trim_end_matches('/'), path_and_query);
    let reqwest_method =
        reqwest::Method::from_bytes(method.as_str().as_bytes()).map_err(|e| ProxyError::Internal { detail: e.to_string() })?;

    let mut request = client.request(reqwest_method, &url).body(body.to_vec()).timeout(timeout);
    for (name, value) in headers.iter() {
        request = request.header(name.as_str(), value.as_bytes());
    }

    let response = request.send().await.map_err(classify_transport_error)?;
    let status = response.status().as_u16();
    let mut out_headers = HeaderMap::new();
    for (name, value) in response.headers().iter() {
        if let (Ok(n), Ok(v)) = (HeaderName::try_from(name.as_str()), HeaderValue::from_bytes(value.as_bytes())) {
            out_headers.insert(n, v);
        }
    }
    let body = response.bytes().await.map_err(classify_transport_error)?;
    Ok(ForwardedResponse { status, headers: out_headers, body })
}

fn classify_transport_error(err: reqwest::Error) -> ProxyError {
    if err.is_timeout() {
        ProxyError::UpstreamTimeout { elapsed: Duration::ZERO }
    } else {
        ProxyError::UpstreamConnection { detail: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_all_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("te", HeaderValue::from_static("trailers"));
        headers.insert("x-custom", HeaderValue::from_static("keep-me"));
        strip_hop_headers(&mut headers);
        assert!(!headers.contains_key("connection"));
        assert!(!headers.contains_key("te"));
        assert!(headers.contains_key("x-custom"));
    }

    #[test]
    fn detects_directory_traversal() {
        assert!(has_directory_traversal("/v1/../etc/passwd"));
        assert!(!has_directory_traversal("/v1/chat/completions"));
    }

    #[test]
    fn injects_forwarded_host_and_proto() {
        let mut headers = HeaderMap::new();
        let addr: SocketAddr = "127.0.0.1:12345".parse().unwrap();
        inject_forwarded_headers(&mut headers, addr, "api.cerebras.ai");
        assert_eq!(headers.get("x-forwarded-host").unwrap(), "api.cerebras.ai");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "http");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "127.0.0.1");
    }

    #[test]
    fn appends_to_existing_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        let addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        inject_forwarded_headers(&mut headers, addr, "host");
        assert_eq!(headers.get("x-forwarded-for").unwrap(), "10.0.0.1, 127.0.0.1");
    }
}
