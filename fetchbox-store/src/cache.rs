//! The cache store capability.

use async_trait::async_trait;
use bytes::Bytes;
use fetchbox_core::Fingerprint;

use crate::error::StoreResult;

/// Key-value storage for encoded cache envelopes.
///
/// Keys are request fingerprints and are opaque to the store. Values are
/// the envelope bytes produced by
/// [`CacheEntry::encode`](fetchbox_core::CacheEntry::encode); the store
/// never inspects them.
///
/// ## TTL contract
///
/// `ttl_secs > 0` expires the entry after that many seconds; `ttl_secs == 0`
/// never expires; `ttl_secs < 0` is already expired and the store must make
/// the entry unobservable.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Reads the entry bytes stored under `key`, if any.
    async fn get(&self, key: &Fingerprint) -> StoreResult<Option<Bytes>>;

    /// Writes entry bytes under `key` with the given TTL.
    async fn set(&self, key: &Fingerprint, value: Bytes, ttl_secs: i64) -> StoreResult<()>;

    /// Removes the entry stored under `key`.
    async fn delete(&self, key: &Fingerprint) -> StoreResult<()>;

    /// Removes every entry.
    async fn clear(&self) -> StoreResult<()>;

    /// Store name used in logs.
    fn name(&self) -> &str {
        "cache"
    }
}
