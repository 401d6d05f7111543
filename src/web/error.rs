//! API error responses.
//!
//! Bodies are always `{"error": <summary>, "details": <payload>}`. The
//! summary tells a client which side failed: its own request, GitHub, or our
//! cache.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use serde_json::Value;
use tracing::{error, warn};

use crate::cache::CacheError;
use crate::github::GitHubError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: &'static str,
    details: Value,
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub error: &'static str,
    pub details: Value,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, details: impl Into<Value>) -> Self {
        Self {
            status,
            error,
            details: details.into(),
        }
    }

    pub fn invalid_query(details: impl Serialize) -> Self {
        let details = serde_json::to_value(details).unwrap_or(Value::Null);
        Self::new(StatusCode::BAD_REQUEST, "Invalid query", details)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.error,
            details: self.details,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<CacheError<GitHubError>> for ApiError {
    fn from(err: CacheError<GitHubError>) -> Self {
        match err {
            CacheError::Producer(upstream) => {
                // Pass GitHub's own status through (403 rate limit, 422 bad query, ...).
                let status = upstream.status().unwrap_or(StatusCode::BAD_GATEWAY);
                warn!(status = status.as_u16(), error = ?upstream, "upstream search failed");
                ApiError::new(status, "Upstream error", upstream.details())
            }
            CacheError::Store(e) => {
                error!(error = ?e, "cache store unavailable");
                ApiError::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "Cache unavailable",
                    e.to_string(),
                )
            }
            CacheError::WaitTimeout { ref key, waited } => {
                warn!(key, waited = ?waited, "gave up waiting on cache lock");
                ApiError::new(
                    StatusCode::GATEWAY_TIMEOUT,
                    "Cache wait timed out",
                    err.to_string(),
                )
            }
            CacheError::Corrupt { .. } | CacheError::Encode(_) | CacheError::EmptyKey => {
                error!(error = ?err, "cache error");
                ApiError::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Cache error",
                    err.to_string(),
                )
            }
        }
    }
}
