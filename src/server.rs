//! Server lifecycle (A6): wires the `axum` router, binds the listener, and
//! shuts down gracefully on `SIGINT`/`SIGTERM`.

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::proxy::{generic, llm};
use crate::state::AppState;
use axum::extract::State;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;

/// Builds the full router: LLM admission path, generic reverse proxy, and
/// the metrics/health surface, behind a single `Host`-sniffing fallback.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/detailed", get(health_detailed))
        .route("/metrics", get(metrics_json))
        .route("/metrics/prometheus", get(metrics_prometheus))
        .route("/metrics/reset", post(metrics_reset))
        .fallback(dispatch)
        .with_state(state)
}

/// Routes every other path by `Host`: the configured LLM host set goes to
/// C7, everything else goes to C8.
async fn dispatch(
    State(state): State<Arc<AppState>>,
    connect_info: axum::extract::ConnectInfo<SocketAddr>,
    method: axum::http::Method,
    uri: axum::http::Uri,
    headers: axum::http::HeaderMap,
    body: axum::body::Bytes,
) -> Response {
    let is_llm_host = headers
        .get(axum::http::header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(crate::host::normalize)
        .is_some_and(|host| crate::host::matches_any(&host, &state.config.cerebras_limits.llm_hosts));

    if is_llm_host {
        llm::handle(State(state), connect_info, method, uri, headers, body).await
    } else {
        generic::handle(State(state), connect_info, method, uri, headers, body).await
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

async fn health_detailed(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let breaker_stats = state.breaker.stats().await;
    Json(json!({
        "status": "ok",
        "metrics": state.metrics.snapshot(),
        "circuit_breaker": {
            "state": breaker_stats.state.as_str(),
            "failure_count": breaker_stats.failure_count,
        },
        "queue_length": state.limiter.queue_length(),
    }))
}

async fn metrics_json(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.metrics.snapshot())
}

async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.render_prometheus()
}

async fn metrics_reset(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.metrics.reset();
    Json(json!({"status": "reset"}))
}

/// Binds `config.server.bind_addr`, serves `build_router`'s app, and shuts
/// down gracefully on `SIGINT`/`SIGTERM`.
pub async fn run(config: ProxyConfig) -> Result<(), ProxyError> {
    let bind_addr = config.server.bind_addr.clone();
    let state = Arc::new(AppState::new(config));
    let app = build_router(state).into_make_service_with_connect_info::<SocketAddr>();

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| ProxyError::Configuration { detail: format!("binding {bind_addr}: {e}") })?;

    tracing::info!(addr = %bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| ProxyError::Internal { detail: e.to_string() })
}

/// Resolves once either `Ctrl+C` or (on unix) `SIGTERM` is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
