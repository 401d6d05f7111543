//! Health handler.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use tracing::{trace, warn};

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    status: &'static str,
    store: &'static str,
    version: &'static str,
    commit: &'static str,
    timestamp: String,
}

/// `GET /health`: 200 when the cache store answers a ping, 503 otherwise.
pub(super) async fn health(State(state): State<AppState>) -> Response {
    trace!("health check requested");
    let store = state.cache.store();
    let (code, status) = match store.ping().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(e) => {
            warn!(error = ?e, backend = store.backend(), "store ping failed");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
    };

    let body = HealthResponse {
        status,
        store: store.backend(),
        version: env!("CARGO_PKG_VERSION"),
        commit: env!("GIT_COMMIT_HASH"),
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    (code, Json(body)).into_response()
}
