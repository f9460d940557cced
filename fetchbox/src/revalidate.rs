//! Background revalidation bookkeeping.
//!
//! Stale-while-revalidate refreshes run as detached tasks registered in a
//! process-local map so tests can drain them and shutdown can abort them.
//! Tasks deduplicate per fingerprint, deregister themselves on settle, and
//! never keep a failure alive: the stale entry simply remains until it
//! falls out of its tolerance window.

use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use fetchbox_core::Fingerprint;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Debug, Default)]
struct Inner {
    tasks: DashMap<Fingerprint, JoinHandle<()>>,
}

/// Tracks in-flight background revalidations.
#[derive(Clone, Debug, Default)]
pub struct RevalidationManager {
    inner: Arc<Inner>,
}

impl RevalidationManager {
    /// Creates an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns a revalidation task for `key` unless one is already in
    /// flight. Returns whether the task was spawned.
    pub fn spawn<F>(&self, key: Fingerprint, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self
            .inner
            .tasks
            .get(&key)
            .is_some_and(|handle| !handle.is_finished())
        {
            debug!(key = %key, "revalidation already in flight");
            return false;
        }

        let inner = self.inner.clone();
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            task.await;
            inner.tasks.remove(&task_key);
        });
        self.inner.tasks.insert(key, handle);
        true
    }

    /// Number of unfinished revalidations.
    pub fn pending(&self) -> usize {
        self.inner
            .tasks
            .iter()
            .filter(|entry| !entry.is_finished())
            .count()
    }

    /// Whether a revalidation for `key` is in flight.
    pub fn is_pending(&self, key: &Fingerprint) -> bool {
        self.inner
            .tasks
            .get(key)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Waits until every tracked revalidation has settled. Intended for
    /// tests and graceful shutdown.
    pub async fn wait_idle(&self) {
        loop {
            self.inner
                .tasks
                .retain(|_, handle| !handle.is_finished());
            if self.inner.tasks.is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }
    }

    /// Aborts every tracked revalidation.
    pub fn abort_all(&self) {
        for entry in self.inner.tasks.iter() {
            entry.abort();
        }
        self.inner.tasks.clear();
    }
}
