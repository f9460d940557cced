//! The dedupe (single-flight) store capability.

use async_trait::async_trait;
use fetchbox_core::{Fingerprint, Payload};

use crate::error::StoreResult;

/// Outcome of [`DedupeStore::register_or_join`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobHandle {
    /// Store-assigned job identity.
    pub job_id: u64,
    /// Whether the caller was elected owner and must perform the fetch.
    pub is_owner: bool,
}

/// Coordination storage for single-flight request coalescing.
///
/// A job is identified by a request fingerprint and is observably in one of
/// four states: absent, pending, completed, failed. The absent→pending
/// transition is atomic via [`register_or_join`](DedupeStore::register_or_join).
///
/// Values must survive `null` round-trips; stores that need sentinel
/// encodings for absent values keep that concern internal.
#[async_trait]
pub trait DedupeStore: Send + Sync {
    /// Waits for the job under `key` to settle.
    ///
    /// Resolves to the completed value, or `None` when there is no job or
    /// the job failed; failures surface to joiners as absence.
    async fn wait_for(&self, key: &Fingerprint) -> StoreResult<Option<Payload>>;

    /// Atomically registers a new pending job or joins the existing one.
    async fn register_or_join(&self, key: &Fingerprint) -> StoreResult<JobHandle>;

    /// Non-atomic registration fallback for stores without an atomic
    /// create-if-absent primitive. Returns the job id.
    async fn register(&self, key: &Fingerprint) -> StoreResult<u64> {
        Ok(self.register_or_join(key).await?.job_id)
    }

    /// Completes the job under `key`, handing `value` to every waiter.
    /// Idempotent: completing a settled or absent job is a no-op.
    async fn complete(&self, key: &Fingerprint, value: Payload) -> StoreResult<()>;

    /// Fails the job under `key`; waiters observe absence.
    async fn fail(&self, key: &Fingerprint, error: String) -> StoreResult<()>;

    /// Whether a pending job exists under `key`.
    async fn is_in_progress(&self, key: &Fingerprint) -> StoreResult<bool>;
}
