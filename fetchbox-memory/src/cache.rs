//! Moka-backed in-memory cache store.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use fetchbox_core::Fingerprint;
use fetchbox_store::{CacheStore, StoreResult};
use moka::{future::Cache, Expiry};

/// A stored value together with its resolved expiry.
#[derive(Clone, Debug)]
struct Stored {
    data: Bytes,
    expire_after: Option<Duration>,
}

/// Per-entry expiration policy reading the TTL resolved at insert time.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct Expiration;

impl Expiry<Fingerprint, Stored> for Expiration {
    fn expire_after_create(
        &self,
        _key: &Fingerprint,
        value: &Stored,
        _created_at: Instant,
    ) -> Option<Duration> {
        value.expire_after
    }

    fn expire_after_update(
        &self,
        _key: &Fingerprint,
        value: &Stored,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        // Use the NEW value's TTL; the default would keep the old deadline.
        value.expire_after
    }
}

/// In-process cache store backed by a moka future cache.
#[derive(Clone)]
pub struct MemoryCacheStore {
    cache: Cache<Fingerprint, Stored>,
}

impl std::fmt::Debug for MemoryCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCacheStore")
            .field("entries", &self.cache.entry_count())
            .finish()
    }
}

impl MemoryCacheStore {
    /// Creates a store holding at most `max_capacity` entries.
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(Expiration)
            .build();
        MemoryCacheStore { cache }
    }

    /// Flushes moka's pending maintenance tasks, making expirations and
    /// invalidation visible. Intended for tests.
    pub async fn run_pending_tasks(&self) {
        self.cache.run_pending_tasks().await;
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &Fingerprint) -> StoreResult<Option<Bytes>> {
        Ok(self.cache.get(key).await.map(|stored| stored.data))
    }

    async fn set(&self, key: &Fingerprint, value: Bytes, ttl_secs: i64) -> StoreResult<()> {
        if ttl_secs < 0 {
            // Already expired: the entry must be unobservable.
            self.cache.invalidate(key).await;
            return Ok(());
        }
        let expire_after = if ttl_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(ttl_secs as u64))
        };
        self.cache
            .insert(
                key.clone(),
                Stored {
                    data: value,
                    expire_after,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &Fingerprint) -> StoreResult<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn clear(&self) -> StoreResult<()> {
        self.cache.invalidate_all();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
