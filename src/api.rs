//! Query API
//!
//! Read-only HTTP endpoints polled by the bridge UI and operators:
//! - GET /health - Liveness with server time
//! - GET /status/{tx_hash} - Status of a bridge operation by source tx hash
//! - GET /retry-queue - Operations waiting for another attempt
//! - GET /metrics - Prometheus metrics
//!
//! Every response disables caching and allows any origin.

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::Utc;
use eyre::{Result, WrapErr};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::metrics;
use crate::retry_queue::{RetryQueue, RetryQueueSnapshot};
use crate::status::StatusStore;
use crate::types::TransactionStatus;

/// Handles the API reads from
#[derive(Clone)]
pub struct ApiState {
    pub status: StatusStore,
    pub retry_queue: RetryQueue,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    /// Unix milliseconds
    pub timestamp: i64,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        timestamp: Utc::now().timestamp_millis(),
    })
}

async fn transaction_status(
    State(state): State<ApiState>,
    Path(tx_hash): Path<String>,
) -> Json<TransactionStatus> {
    Json(state.status.get(&tx_hash).await)
}

async fn retry_queue(State(state): State<ApiState>) -> Json<RetryQueueSnapshot> {
    Json(state.retry_queue.snapshot().await)
}

/// Prometheus metrics endpoint
async fn prometheus_metrics() -> Response {
    match metrics::gather_text() {
        Ok(body) => ([(header::CONTENT_TYPE, prometheus::TEXT_FORMAT)], body).into_response(),
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response(),
    }
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Not Found")
}

async fn no_cache_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store, no-cache, must-revalidate, proxy-revalidate"),
    );
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(header::EXPIRES, HeaderValue::from_static("0"));
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    response
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status/{tx_hash}", get(transaction_status))
        .route("/retry-queue", get(retry_queue))
        .route("/metrics", get(prometheus_metrics))
        .fallback(not_found)
        .layer(middleware::map_response(no_cache_headers))
        .with_state(state)
}

/// Serve the API on `listener` until `cancel` fires
pub async fn serve(listener: TcpListener, state: ApiState, cancel: CancellationToken) -> Result<()> {
    let addr = listener.local_addr().wrap_err("Failed to read listener address")?;
    metrics::init();
    info!(%addr, "Query API listening");
    info!("  /health            - Liveness");
    info!("  /status/{{tx_hash}} - Bridge operation status");
    info!("  /retry-queue       - Pending retries");
    info!("  /metrics           - Prometheus metrics");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .wrap_err("Query API server failed")?;

    info!("Query API stopped");
    Ok(())
}

/// Bind the API listener. Called before the relay engine starts so a taken
/// port aborts startup.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    TcpListener::bind(addr)
        .await
        .wrap_err_with(|| format!("Failed to bind query API on {}", addr))
}
