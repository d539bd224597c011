//! Liveness and readiness handlers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// How long readiness waits for the store to answer.
const STORE_PING_TIMEOUT: Duration = Duration::from_secs(2);

/// Liveness response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status.
    pub status: String,
    /// Service name.
    pub service: String,
    /// Service version.
    pub version: String,
}

/// Liveness endpoint. Answers whenever the process is serving requests.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        service: "image-lab".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Readiness response.
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    /// `ready` or `unavailable`.
    pub status: &'static str,
    /// Store check result: `ok`, `error` or `timeout`.
    pub store: &'static str,
}

/// Readiness endpoint. Returns 503 until the store answers a ping.
pub async fn ready(State(state): State<Arc<AppState>>) -> (StatusCode, Json<ReadinessResponse>) {
    let store = match tokio::time::timeout(STORE_PING_TIMEOUT, state.store.ping()).await {
        Ok(Ok(())) => "ok",
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Store ping failed");
            "error"
        }
        Err(_) => {
            tracing::warn!(timeout_ms = STORE_PING_TIMEOUT.as_millis(), "Store ping timed out");
            "timeout"
        }
    };

    if store == "ok" {
        (
            StatusCode::OK,
            Json(ReadinessResponse {
                status: "ready",
                store,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessResponse {
                status: "unavailable",
                store,
            }),
        )
    }
}
