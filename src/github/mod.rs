//! GitHub repository search client.
//!
//! Every request waits on a process-wide `governor` limiter before it goes
//! out, so a burst of cache misses cannot exceed the configured request rate
//! against GitHub even if the shared store is down.

pub mod errors;
pub mod json;

pub use errors::GitHubError;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Instant;
use tracing::{debug, trace};

use crate::utils::fmt_duration;

const USER_AGENT_VALUE: &str = concat!("popularity/", env!("CARGO_PKG_VERSION"));
const GITHUB_MEDIA_TYPE: &str = "application/vnd.github+json";

/// A validated repository search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub language: String,
    /// Lower bound on creation date, as given by the caller (`YYYY-MM-DD` or RFC 3339).
    pub created_after: String,
    pub q: Option<String>,
    pub per_page: u8,
    pub page: u8,
}

impl SearchQuery {
    /// GitHub search expression: `language:X created:>=Y [free text]`.
    pub fn search_expression(&self) -> String {
        let mut expr = format!(
            "language:{} created:>={}",
            self.language, self.created_after
        );
        if let Some(q) = self.q.as_deref().filter(|q| !q.is_empty()) {
            expr.push(' ');
            expr.push_str(q);
        }
        expr
    }

    /// Query-string parameters in the fixed order used for both the request
    /// and the cache key.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        vec![
            ("q", self.search_expression()),
            ("sort", "updated".to_string()),
            ("order", "desc".to_string()),
            ("per_page", self.per_page.to_string()),
            ("page", self.page.to_string()),
        ]
    }

    /// Form-encoded query string, e.g. `q=language%3ARust+...&sort=updated&...`.
    pub fn query_string(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.params())
            .finish()
    }

    /// Deterministic cache key: identical searches map to identical keys.
    pub fn cache_key(&self) -> String {
        format!("gh:{}", self.query_string())
    }
}

/// A repository as returned by the search endpoint (fields we use).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: u64,
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    pub description: Option<String>,
    pub language: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub stargazers_count: u64,
    pub forks_count: u64,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub watchers_count: u64,
    #[serde(default)]
    pub open_issues_count: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResults {
    #[serde(default)]
    pub total_count: u64,
    #[serde(default)]
    pub items: Vec<Repository>,
}

/// Source of repository search results. Implemented by [`GitHubClient`];
/// tests substitute their own.
#[async_trait]
pub trait RepoSearch: Send + Sync {
    async fn search_repositories(&self, query: &SearchQuery) -> Result<SearchResults, GitHubError>;
}

pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    limiter: DefaultDirectRateLimiter,
}

impl GitHubClient {
    /// Build a client against `base_url` (normally `https://api.github.com`),
    /// allowing at most `requests_per_minute` outgoing searches.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<&str>,
        requests_per_minute: NonZeroU32,
    ) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(GITHUB_MEDIA_TYPE));
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(std::time::Duration::from_secs(20))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter: RateLimiter::direct(Quota::per_minute(requests_per_minute)),
        })
    }
}

#[async_trait]
impl RepoSearch for GitHubClient {
    async fn search_repositories(&self, query: &SearchQuery) -> Result<SearchResults, GitHubError> {
        self.limiter.until_ready().await;

        let url = format!(
            "{}/search/repositories?{}",
            self.base_url,
            query.query_string()
        );
        trace!(url = %url, "GitHub search request");

        let start = Instant::now();
        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        debug!(
            status = status.as_u16(),
            bytes = body.len(),
            duration = fmt_duration(start.elapsed()),
            "GitHub search response"
        );

        if !status.is_success() {
            let details = serde_json::from_str(&body)
                .unwrap_or_else(|_| serde_json::Value::Object(Default::default()));
            return Err(GitHubError::Status { status, details });
        }

        json::parse_json_with_context(&body).map_err(|source| GitHubError::Parse { status, source })
    }
}
