//! The key-value store interface consumed by [`CoordinatedCache`](super::CoordinatedCache).
//!
//! Implementations must provide an atomic "set if absent" and expire entries
//! on their own once their lifetime has passed. The cache never deletes a
//! value entry; it only deletes lock entries it still owns.

use async_trait::async_trait;
use std::time::Duration;

/// Failure talking to the backing store.
///
/// Always fatal to the current call. A store error is never treated as a
/// cache miss, since that would send every caller upstream during an outage.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("redis command failed")]
    Redis(#[from] redis::RedisError),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Read a value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically create `key` with a lease if it does not exist.
    ///
    /// Returns `true` for exactly one concurrent caller per key.
    async fn set_if_absent(
        &self,
        key: &str,
        marker: &str,
        lease: Duration,
    ) -> Result<bool, StoreError>;

    /// Unconditionally write `key`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Atomically delete `key` only if it still holds `expected`.
    ///
    /// Returns `false` when the key is gone or holds something else, e.g. a
    /// lock whose lease ran out and was taken by another caller.
    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError>;

    /// Cheap liveness probe used by the health endpoint.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;
}
