//! `GET /repos/popularity`: scored GitHub repository search.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::Json;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, instrument};

use crate::github::{GitHubError, Repository, SearchQuery};
use crate::scoring::popularity_score;
use crate::state::AppState;
use crate::web::error::ApiError;

const PER_PAGE_RANGE: std::ops::RangeInclusive<u8> = 1..=100;
const PAGE_RANGE: std::ops::RangeInclusive<u8> = 1..=10;
const DEFAULT_PER_PAGE: u8 = 10;
const DEFAULT_PAGE: u8 = 1;

/// Raw query string. Everything is a string so that validation, not the
/// extractor, decides what a bad value means.
#[derive(Debug, Default, Deserialize)]
pub struct PopularityParams {
    pub language: Option<String>,
    pub created_after: Option<String>,
    pub q: Option<String>,
    pub per_page: Option<String>,
    pub page: Option<String>,
}

/// Per-field validation messages.
#[derive(Debug, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValidationErrors {
    pub form_errors: Vec<String>,
    pub field_errors: BTreeMap<&'static str, Vec<String>>,
}

impl ValidationErrors {
    fn add(&mut self, field: &'static str, message: impl Into<String>) {
        self.field_errors
            .entry(field)
            .or_default()
            .push(message.into());
    }

    /// A failure that belongs to the query string as a whole.
    fn form(message: impl Into<String>) -> Self {
        Self {
            form_errors: vec![message.into()],
            field_errors: BTreeMap::new(),
        }
    }

    fn is_empty(&self) -> bool {
        self.form_errors.is_empty() && self.field_errors.is_empty()
    }
}

/// `YYYY-MM-DD` or a full RFC 3339 timestamp.
fn is_iso_date(value: &str) -> bool {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        || DateTime::parse_from_rfc3339(value).is_ok()
}

fn parse_bounded(
    errors: &mut ValidationErrors,
    field: &'static str,
    raw: Option<&str>,
    range: std::ops::RangeInclusive<u8>,
    default: u8,
) -> u8 {
    let Some(raw) = raw.map(str::trim).filter(|s| !s.is_empty()) else {
        return default;
    };
    match raw.parse::<i64>() {
        Ok(n) if n >= i64::from(*range.start()) && n <= i64::from(*range.end()) => n as u8,
        Ok(_) => {
            errors.add(
                field,
                format!(
                    "{field} must be between {} and {}",
                    range.start(),
                    range.end()
                ),
            );
            default
        }
        Err(_) => {
            errors.add(field, format!("{field} must be an integer"));
            default
        }
    }
}

impl PopularityParams {
    pub fn validate(&self) -> Result<SearchQuery, ValidationErrors> {
        let mut errors = ValidationErrors::default();

        let language = self.language.as_deref().unwrap_or("");
        if language.is_empty() {
            errors.add("language", "language is required");
        }

        let created_after = self.created_after.as_deref().unwrap_or("");
        if created_after.is_empty() {
            errors.add("created_after", "created_after is required");
        } else if !is_iso_date(created_after) {
            errors.add(
                "created_after",
                "created_after must be an ISO-8601 date (e.g., 2024-01-01)",
            );
        }

        let per_page = parse_bounded(
            &mut errors,
            "per_page",
            self.per_page.as_deref(),
            PER_PAGE_RANGE,
            DEFAULT_PER_PAGE,
        );
        let page = parse_bounded(
            &mut errors,
            "page",
            self.page.as_deref(),
            PAGE_RANGE,
            DEFAULT_PAGE,
        );

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(SearchQuery {
            language: language.to_string(),
            created_after: created_after.to_string(),
            q: self.q.clone().filter(|q| !q.is_empty()),
            per_page,
            page,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueryEcho {
    pub language: String,
    pub created_after: String,
    pub per_page: u8,
    pub page: u8,
    pub q: String,
}

/// A search hit with its popularity score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredRepository {
    #[serde(flatten)]
    pub repository: Repository,
    pub score: f64,
}

/// Response body, and also the value stored in the shared cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PopularityResponse {
    pub query: QueryEcho,
    pub result_count: usize,
    pub items: Vec<ScoredRepository>,
}

/// Score every repository against `now` and order by descending score.
pub fn rank(items: Vec<Repository>, now: DateTime<Utc>) -> Vec<ScoredRepository> {
    let mut scored: Vec<ScoredRepository> = items
        .into_iter()
        .map(|repository| {
            let score = popularity_score(
                repository.stargazers_count,
                repository.forks_count,
                repository.updated_at,
                now,
            );
            ScoredRepository { repository, score }
        })
        .collect();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored
}

/// `GET /repos/popularity?language=..&created_after=..[&q=..][&per_page=..][&page=..]`
#[instrument(skip_all, fields(cache_key = tracing::field::Empty))]
pub(super) async fn popularity(
    State(state): State<AppState>,
    params: Result<Query<PopularityParams>, QueryRejection>,
) -> Result<Json<PopularityResponse>, ApiError> {
    // Malformed query strings (e.g. a repeated parameter) get the same body shape as invalid values.
    let Query(params) = params
        .map_err(|rejection| ApiError::invalid_query(ValidationErrors::form(rejection.body_text())))?;
    let query = params.validate().map_err(ApiError::invalid_query)?;
    let key = query.cache_key();
    tracing::Span::current().record("cache_key", key.as_str());

    let search = state.search.clone();
    let response = state
        .cache
        .get_or_compute(&key, state.cache_ttl, || async move {
            let results = search.search_repositories(&query).await?;
            let items = rank(results.items, Utc::now());
            debug!(items = items.len(), total = results.total_count, "search scored");
            Ok::<_, GitHubError>(PopularityResponse {
                query: QueryEcho {
                    language: query.language,
                    created_after: query.created_after,
                    per_page: query.per_page,
                    page: query.page,
                    q: query.q.unwrap_or_default(),
                },
                result_count: items.len(),
                items,
            })
        })
        .await?;

    Ok(Json(response))
}
