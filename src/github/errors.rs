//! Error types for the GitHub search client.

use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    /// GitHub answered with a non-success status. `details` is the response
    /// body when it was JSON, otherwise an empty object.
    #[error("GitHub API error ({status})")]
    Status {
        status: StatusCode,
        details: serde_json::Value,
    },
    #[error("GitHub request failed")]
    Request(#[from] reqwest::Error),
    #[error("Failed to parse GitHub response")]
    Parse {
        status: StatusCode,
        #[source]
        source: anyhow::Error,
    },
}

impl GitHubError {
    /// Status to surface to our own callers, if GitHub gave one.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            GitHubError::Status { status, .. } => Some(*status),
            GitHubError::Request(e) => e.status(),
            GitHubError::Parse { .. } => None,
        }
    }

    /// Payload describing the failure, suitable for an API error body.
    pub fn details(&self) -> serde_json::Value {
        match self {
            GitHubError::Status { details, .. } => details.clone(),
            GitHubError::Request(e) => serde_json::Value::String(e.to_string()),
            GitHubError::Parse { source, .. } => serde_json::Value::String(format!("{source:#}")),
        }
    }
}
