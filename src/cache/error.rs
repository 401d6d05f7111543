//! Error type for the coordinated cache.

use super::store::StoreError;
use std::time::Duration;

/// Everything that can end a `get_or_compute` call.
///
/// `Producer` is the only variant that means "upstream said no"; the rest are
/// cache or store malfunctions. Lease expiry is not represented here: it is
/// handled internally by restarting the protocol.
#[derive(Debug, thiserror::Error)]
pub enum CacheError<E> {
    #[error("cache key must not be empty")]
    EmptyKey,
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("cached value for '{key}' could not be decoded")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("produced value could not be serialized")]
    Encode(#[source] serde_json::Error),
    #[error("gave up waiting for '{key}' after {waited:?}")]
    WaitTimeout { key: String, waited: Duration },
    #[error("producer failed")]
    Producer(#[source] E),
}

impl<E> CacheError<E> {
    /// Whether this error originated in the producer rather than the cache.
    pub fn is_producer(&self) -> bool {
        matches!(self, CacheError::Producer(_))
    }
}
