//! In-memory single-flight dedupe store.
//!
//! Jobs live in a concurrent map keyed by fingerprint; waiters subscribe to
//! a broadcast channel created when the job registers. Settling a job
//! (complete or fail) broadcasts the outcome and removes the map entry, so
//! results are visible only to callers already waiting; later requests go
//! back through the cache phase instead of replaying a dedupe result.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use fetchbox_core::{Fingerprint, Payload};
use fetchbox_store::{DedupeStore, JobHandle, StoreResult};
use tokio::sync::broadcast;
use tracing::debug;

/// Broadcast capacity: a job sends exactly one settle message.
const CHANNEL_CAPACITY: usize = 4;

#[derive(Debug)]
struct Job {
    id: u64,
    tx: broadcast::Sender<Option<Payload>>,
}

/// In-process dedupe store.
#[derive(Debug, Default)]
pub struct MemoryDedupeStore {
    jobs: DashMap<Fingerprint, Job>,
    job_counter: AtomicU64,
}

impl MemoryDedupeStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> u64 {
        self.job_counter.fetch_add(1, Ordering::Relaxed)
    }

    fn settle(&self, key: &Fingerprint, outcome: Option<Payload>) {
        if let Some((_, job)) = self.jobs.remove(key) {
            // Send fails only when no waiter subscribed; that is fine.
            let _ = job.tx.send(outcome);
        }
    }
}

#[async_trait]
impl DedupeStore for MemoryDedupeStore {
    async fn wait_for(&self, key: &Fingerprint) -> StoreResult<Option<Payload>> {
        // Subscribe under the map reference so a settle between lookup and
        // subscription cannot be missed, then release before awaiting.
        let mut rx = match self.jobs.get(key) {
            Some(job) => job.tx.subscribe(),
            None => return Ok(None),
        };
        match rx.recv().await {
            Ok(outcome) => Ok(outcome),
            // Closed: the job was dropped without settling (owner aborted
            // the process-local store). Surface as absent.
            Err(broadcast::error::RecvError::Closed) => Ok(None),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "dedupe waiter lagged; treating as absent");
                Ok(None)
            }
        }
    }

    async fn register_or_join(&self, key: &Fingerprint) -> StoreResult<JobHandle> {
        // The entry API makes the absent→pending transition atomic.
        match self.jobs.entry(key.clone()) {
            dashmap::mapref::entry::Entry::Occupied(existing) => Ok(JobHandle {
                job_id: existing.get().id,
                is_owner: false,
            }),
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let id = self.next_id();
                let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
                vacant.insert(Job { id, tx });
                Ok(JobHandle {
                    job_id: id,
                    is_owner: true,
                })
            }
        }
    }

    async fn register(&self, key: &Fingerprint) -> StoreResult<u64> {
        // Non-atomic fallback path: check, then insert.
        if let Some(job) = self.jobs.get(key) {
            return Ok(job.id);
        }
        let id = self.next_id();
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        self.jobs.insert(key.clone(), Job { id, tx });
        Ok(id)
    }

    async fn complete(&self, key: &Fingerprint, value: Payload) -> StoreResult<()> {
        self.settle(key, Some(value));
        Ok(())
    }

    async fn fail(&self, key: &Fingerprint, error: String) -> StoreResult<()> {
        debug!(key = %key, error = %error, "dedupe job failed");
        self.settle(key, None);
        Ok(())
    }

    async fn is_in_progress(&self, key: &Fingerprint) -> StoreResult<bool> {
        Ok(self.jobs.contains_key(key))
    }
}
