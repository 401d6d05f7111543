//! Process-local [`KvStore`] for development and tests.
//!
//! Coordination only spans the current process, so this is a stand-in for a
//! shared store, not a replacement. Deadlines use the tokio clock so paused
//! time in tests drives expiry.

use super::store::{KvStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Slot {
    value: String,
    expires_at: Instant,
}

impl Slot {
    fn is_live(&self, now: Instant) -> bool {
        now < self.expires_at
    }
}

/// Clone-cheap in-memory store. Expired entries are dropped lazily on access.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    entries: Arc<DashMap<String, Slot>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries (locks included).
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.entries.iter().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let Some(slot) = self.entries.get(key).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        if slot.is_live(now) {
            return Ok(Some(slot.value));
        }
        self.entries.remove_if(key, |_, s| !s.is_live(now));
        Ok(None)
    }

    async fn set_if_absent(
        &self,
        key: &str,
        marker: &str,
        lease: Duration,
    ) -> Result<bool, StoreError> {
        let now = Instant::now();
        let slot = Slot {
            value: marker.to_owned(),
            expires_at: now + lease,
        };
        // The entry guard holds the shard lock, so check-and-insert is atomic.
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(mut existing) => {
                if existing.get().is_live(now) {
                    Ok(false)
                } else {
                    existing.insert(slot);
                    Ok(true)
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(slot);
                Ok(true)
            }
        }
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.entries.insert(
            key.to_owned(),
            Slot {
                value: value.to_owned(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool, StoreError> {
        Ok(self
            .entries
            .remove_if(key, |_, slot| slot.value == expected)
            .is_some())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}
