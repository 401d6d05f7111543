//! End-to-end tests of the HTTP surface against an in-memory store and a fake
//! search backend.

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::{Duration as ChronoDuration, Utc};
use popularity::cache::{CoordinatedCache, InMemoryStore, KvStore};
use popularity::github::{GitHubError, RepoSearch, Repository, SearchQuery, SearchResults};
use popularity::state::AppState;
use popularity::web::create_router;
use popularity::web::middleware::request_id::REQUEST_ID_HEADER;
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceExt;

const QUERY: &str = "/repos/popularity?language=Rust&created_after=2024-01-01&per_page=5";

enum Outcome {
    Repos(Vec<Repository>),
    Status(StatusCode, Value),
}

struct FakeSearch {
    calls: AtomicUsize,
    delay: Duration,
    outcome: Outcome,
}

impl FakeSearch {
    fn new(outcome: Outcome) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
            outcome,
        })
    }

    fn slow(outcome: Outcome, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            delay,
            outcome,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RepoSearch for FakeSearch {
    async fn search_repositories(&self, _query: &SearchQuery) -> Result<SearchResults, GitHubError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.outcome {
            Outcome::Repos(items) => Ok(SearchResults {
                total_count: items.len() as u64,
                items: items.clone(),
            }),
            Outcome::Status(status, details) => Err(GitHubError::Status {
                status: *status,
                details: details.clone(),
            }),
        }
    }
}

fn repo(id: u64, stars: u64, forks: u64, days_old: i64) -> Repository {
    let updated_at = Utc::now() - ChronoDuration::days(days_old);
    Repository {
        id,
        name: format!("repo{id}"),
        full_name: format!("owner/repo{id}"),
        html_url: format!("https://github.com/owner/repo{id}"),
        description: Some("a repository".into()),
        language: Some("Rust".into()),
        topics: vec!["cli".into()],
        stargazers_count: stars,
        forks_count: forks,
        updated_at,
        created_at: updated_at,
        watchers_count: stars,
        open_issues_count: 0,
    }
}

fn sample_repos() -> Vec<Repository> {
    vec![repo(1, 3, 0, 200), repo(2, 900, 40, 1), repo(3, 50, 5, 10)]
}

fn app(search: Arc<FakeSearch>) -> (axum::Router, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let cache = CoordinatedCache::new(store.clone());
    let state = AppState::new(cache, search, Duration::from_secs(60));
    (create_router(state), store)
}

async fn get(router: &axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn ids_of(body: &Value) -> Vec<u64> {
    body["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["id"].as_u64().unwrap())
        .collect()
}

#[tokio::test]
async fn scored_results_are_sorted_and_cached() {
    let search = FakeSearch::new(Outcome::Repos(sample_repos()));
    let (router, store) = app(search.clone());

    let (status, body) = get(&router, QUERY).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result_count"], 3);
    assert_eq!(body["query"]["language"], "Rust");
    assert_eq!(body["query"]["per_page"], 5);
    assert_eq!(body["query"]["page"], 1);
    assert_eq!(body["query"]["q"], "");

    let items = body["items"].as_array().unwrap();
    let ids = ids_of(&body);
    assert_eq!(ids, vec![2, 3, 1]);
    let scores: Vec<f64> = items.iter().map(|i| i["score"].as_f64().unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(items[0]["full_name"], "owner/repo2");

    let (status, again) = get(&router, QUERY).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids_of(&again), ids);
    assert_eq!(search.calls(), 1, "second request should be a cache hit");

    let key = SearchQuery {
        language: "Rust".into(),
        created_after: "2024-01-01".into(),
        q: None,
        per_page: 5,
        page: 1,
    }
    .cache_key();
    assert!(store.get(&key).await.unwrap().is_some());
}

#[tokio::test]
async fn different_queries_are_cached_separately() {
    let search = FakeSearch::new(Outcome::Repos(sample_repos()));
    let (router, _store) = app(search.clone());

    get(&router, QUERY).await;
    get(&router, &format!("{QUERY}&page=2")).await;
    get(&router, &format!("{QUERY}&q=async")).await;
    assert_eq!(search.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn concurrent_identical_requests_hit_upstream_once() {
    let search = FakeSearch::slow(
        Outcome::Repos(sample_repos()),
        Duration::from_millis(300),
    );
    let (router, _store) = app(search.clone());

    let requests = (0..8).map(|_| get(&router, QUERY));
    let responses = futures::future::join_all(requests).await;

    assert_eq!(search.calls(), 1);
    for (status, body) in &responses {
        assert_eq!(*status, StatusCode::OK);
        assert_eq!(ids_of(body), vec![2, 3, 1]);
    }
}

#[tokio::test]
async fn invalid_query_is_rejected_before_searching() {
    let search = FakeSearch::new(Outcome::Repos(sample_repos()));
    let (router, _store) = app(search.clone());

    let (status, body) = get(&router, "/repos/popularity?created_after=yesterday&per_page=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid query");
    let fields = &body["details"]["fieldErrors"];
    assert_eq!(fields["language"], json!(["language is required"]));
    assert_eq!(
        fields["created_after"],
        json!(["created_after must be an ISO-8601 date (e.g., 2024-01-01)"])
    );
    assert_eq!(fields["per_page"], json!(["per_page must be between 1 and 100"]));
    assert_eq!(search.calls(), 0);
}

#[tokio::test]
async fn malformed_query_string_keeps_the_error_shape() {
    let search = FakeSearch::new(Outcome::Repos(sample_repos()));
    let (router, _store) = app(search.clone());

    let (status, body) = get(&router, &format!("{QUERY}&per_page=6")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Invalid query");
    let form_errors = body["details"]["formErrors"].as_array().unwrap();
    assert_eq!(form_errors.len(), 1);
    assert!(form_errors[0].as_str().unwrap().contains("per_page"), "{body}");
    assert_eq!(body["details"]["fieldErrors"], json!({}));
    assert_eq!(search.calls(), 0);
}

#[tokio::test]
async fn blank_language_is_passed_to_the_search() {
    let search = FakeSearch::new(Outcome::Repos(sample_repos()));
    let (router, _store) = app(search.clone());

    let (status, body) = get(&router, "/repos/popularity?language=%20&created_after=2024-01-01").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"]["language"], " ");
    assert_eq!(search.calls(), 1);
}

#[tokio::test]
async fn upstream_status_is_passed_through_and_not_cached() {
    let search = FakeSearch::new(Outcome::Status(
        StatusCode::FORBIDDEN,
        json!({"message": "API rate limit exceeded"}),
    ));
    let (router, store) = app(search.clone());

    let (status, body) = get(&router, QUERY).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "Upstream error");
    assert_eq!(body["details"]["message"], "API rate limit exceeded");
    assert!(store.is_empty(), "failed search left an entry behind");

    get(&router, QUERY).await;
    assert_eq!(search.calls(), 2);
}

#[tokio::test]
async fn health_reports_store_backend() {
    let (router, _store) = app(FakeSearch::new(Outcome::Repos(vec![])));

    let (status, body) = get(&router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["store"], "memory");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn request_id_is_echoed() {
    let (router, _store) = app(FakeSearch::new(Outcome::Repos(vec![])));

    let response = router
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(REQUEST_ID_HEADER, "trace-abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()[REQUEST_ID_HEADER], "trace-abc");
}
