//! Cache-aside with a distributed lease lock, shared by every server process.
//!
//! A lookup that hits returns after one store round trip. On a miss, callers
//! race to create the lock entry for the key; the single winner runs the
//! producer, publishes the value, and releases the lock. Everyone else polls
//! for the value until the lease would have run out, then starts over. The
//! lease is the only recovery path for a winner that crashed or hung, so it
//! must outlast the slowest producer.
//!
//! All coordination goes through the store's atomic set-if-absent. Nothing is
//! held in-process across an await, so the guarantees span processes.

mod error;
pub mod memory;
pub mod redis;
mod store;

pub use error::CacheError;
pub use memory::InMemoryStore;
pub use redis::RedisStore;
pub use store::{KvStore, StoreError};

use crate::utils::{fmt_duration, log_if_slow};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, warn};

/// Namespace for lock entries, kept apart from value keys.
pub const LOCK_PREFIX: &str = "lock:";

/// Producers slower than this are logged at warn.
const SLOW_PRODUCER: Duration = Duration::from_secs(2);

/// Key of the lock entry guarding `key`.
pub fn lock_key(key: &str) -> String {
    format!("{LOCK_PREFIX}{key}")
}

/// Lease and polling parameters for a single `get_or_compute` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// Lock lifetime. Must exceed the worst-case producer latency, or
    /// followers give up early and a second producer run can start.
    pub lease: Duration,
    /// How often followers re-read the value while waiting.
    pub poll_interval: Duration,
    /// Upper bound on the whole call, retries included. `None` retries forever.
    pub max_wait: Option<Duration>,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            lease: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            max_wait: None,
        }
    }
}

/// Handle to the coordinated cache. Clone-cheap; clones share the store.
#[derive(Clone)]
pub struct CoordinatedCache {
    store: Arc<dyn KvStore>,
    defaults: LockOptions,
}

impl CoordinatedCache {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self::with_options(store, LockOptions::default())
    }

    pub fn with_options(store: Arc<dyn KvStore>, defaults: LockOptions) -> Self {
        Self { store, defaults }
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn defaults(&self) -> LockOptions {
        self.defaults
    }

    /// [`get_or_compute_with`](Self::get_or_compute_with) using the cache's default options.
    pub async fn get_or_compute<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<T, CacheError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_compute_with(key, ttl, self.defaults, producer)
            .await
    }

    /// Return the value cached under `key`, computing it with `producer` if
    /// no caller anywhere has published it yet.
    ///
    /// The result is the same whether this call hit, won the race, or waited
    /// on another caller. `producer` runs at most once, and only if this call
    /// wins the lock.
    ///
    /// A `ttl` of zero means "do not cache": the winner hands its value back
    /// without writing it, and concurrent followers wait out the lease and
    /// produce for themselves.
    ///
    /// # Errors
    ///
    /// Store failures, undecodable entries, and producer failures all end the
    /// call. Producer errors reach only the winner; followers never see them.
    pub async fn get_or_compute_with<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        options: LockOptions,
        producer: F,
    ) -> Result<T, CacheError<E>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if key.is_empty() {
            return Err(CacheError::EmptyKey);
        }

        let started = Instant::now();
        let lock = lock_key(key);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            if let Some(value) = self.lookup::<T, E>(key).await? {
                debug!(key, attempt, "cache hit");
                return Ok(value);
            }

            let owner = ulid::Ulid::new().to_string();
            if self
                .store
                .set_if_absent(&lock, &owner, options.lease)
                .await?
            {
                debug!(key, attempt, owner = %owner, "lock acquired, producing");
                let guard = LockGuard::new(self.store.clone(), key, lock, owner);
                let produced = self.produce_and_publish(key, ttl, producer).await;
                guard.release().await;
                return produced;
            }

            debug!(key, attempt, "lock held elsewhere, waiting for value");
            let deadline = Instant::now() + options.lease;
            while Instant::now() < deadline {
                if let Some(value) = self.lookup::<T, E>(key).await? {
                    debug!(
                        key,
                        attempt,
                        waited = fmt_duration(started.elapsed()),
                        "value published by lock holder"
                    );
                    return Ok(value);
                }
                check_max_wait::<E>(key, started, options.max_wait)?;
                sleep(options.poll_interval).await;
            }

            debug!(key, attempt, "lease ran out with no value, restarting");
            check_max_wait::<E>(key, started, options.max_wait)?;
        }
    }

    async fn lookup<T, E>(&self, key: &str) -> Result<Option<T>, CacheError<E>>
    where
        T: DeserializeOwned,
    {
        let Some(raw) = self.store.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_str(&raw)
            .map(Some)
            .map_err(|source| CacheError::Corrupt {
                key: key.to_owned(),
                source,
            })
    }

    /// Winner path up to, but not including, the lock release.
    async fn produce_and_publish<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Duration,
        producer: F,
    ) -> Result<T, CacheError<E>>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let start = std::time::Instant::now();
        let value = producer().await.map_err(CacheError::Producer)?;
        log_if_slow(start, SLOW_PRODUCER, "cache producer");

        if ttl.is_zero() {
            debug!(key, "ttl is zero, value not cached");
            return Ok(value);
        }

        let encoded = serde_json::to_string(&value).map_err(CacheError::Encode)?;
        self.store.set_with_ttl(key, &encoded, ttl).await?;
        debug!(key, ttl = fmt_duration(ttl), bytes = encoded.len(), "value published");
        Ok(value)
    }
}

/// The winner's hold on a lock entry.
///
/// [`release`](Self::release) deletes the entry on the normal path. If the
/// winning future is dropped first (client disconnect, request timeout) or
/// the producer panics, `Drop` hands the delete to the runtime so followers
/// are not left waiting out the lease.
struct LockGuard {
    store: Arc<dyn KvStore>,
    key: String,
    lock: String,
    owner: String,
    armed: bool,
}

impl LockGuard {
    fn new(store: Arc<dyn KvStore>, key: &str, lock: String, owner: String) -> Self {
        Self {
            store,
            key: key.to_owned(),
            lock,
            owner,
            armed: true,
        }
    }

    async fn release(mut self) {
        release_lock(self.store.as_ref(), &self.key, &self.lock, &self.owner).await;
        self.armed = false;
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(key = %self.key, "lock abandoned outside a runtime; lease expiry will clear it");
            return;
        };
        debug!(key = %self.key, "lock holder dropped before release, releasing in background");
        let store = self.store.clone();
        let key = std::mem::take(&mut self.key);
        let lock = std::mem::take(&mut self.lock);
        let owner = std::mem::take(&mut self.owner);
        runtime.spawn(async move {
            release_lock(store.as_ref(), &key, &lock, &owner).await;
        });
    }
}

/// Delete `lock` if `owner` still holds it. Failures are logged, not
/// returned: the lease clears the lock regardless.
async fn release_lock(store: &dyn KvStore, key: &str, lock: &str, owner: &str) {
    match store.compare_and_delete(lock, owner).await {
        Ok(true) => {}
        Ok(false) => {
            warn!(key, "lock lease ran out before release; left to its new holder");
        }
        Err(e) => {
            warn!(key, error = ?e, "failed to release lock; lease expiry will clear it");
        }
    }
}

fn check_max_wait<E>(
    key: &str,
    started: Instant,
    max_wait: Option<Duration>,
) -> Result<(), CacheError<E>> {
    match max_wait {
        Some(limit) if started.elapsed() >= limit => Err(CacheError::WaitTimeout {
            key: key.to_owned(),
            waited: started.elapsed(),
        }),
        _ => Ok(()),
    }
}
