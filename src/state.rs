//! Application state shared by request handlers.

use std::sync::Arc;
use std::time::Duration;

use crate::cache::CoordinatedCache;
use crate::github::RepoSearch;

#[derive(Clone)]
pub struct AppState {
    pub cache: CoordinatedCache,
    pub search: Arc<dyn RepoSearch>,
    /// Lifetime of cached search responses. Zero disables caching.
    pub cache_ttl: Duration,
}

impl AppState {
    pub fn new(cache: CoordinatedCache, search: Arc<dyn RepoSearch>, cache_ttl: Duration) -> Self {
        Self {
            cache,
            search,
            cache_ttl,
        }
    }
}
