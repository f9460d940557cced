//! Single-flight coordination over the dedupe store.
//!
//! For each request the pipeline first tries to share an existing in-flight
//! result, then contends for ownership. Exactly one caller per fingerprint
//! owns the fetch; the rest block on the store's wait primitive. A joiner
//! that observes the owner's failure does not re-fetch; it surfaces the
//! upstream failure so a failing origin sees one request per burst.

use std::sync::Arc;

use fetchbox_core::{Fingerprint, Payload};
use fetchbox_store::{DedupeStore, StoreResult};
use tracing::debug;

/// Result of contending for a fingerprint.
#[derive(Debug)]
pub enum Claim {
    /// This caller owns the fetch and must settle the job.
    Owner {
        /// Store-assigned job id, for logs.
        job_id: u64,
    },
    /// Another caller's completed fetch supplied the value.
    Shared(Payload),
    /// The owner failed; the joiner propagates the failure.
    UpstreamFailed,
}

/// Thin protocol layer over the injected dedupe store.
#[derive(Clone)]
pub struct DedupeCoordinator {
    store: Arc<dyn DedupeStore>,
}

impl std::fmt::Debug for DedupeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DedupeCoordinator").finish()
    }
}

impl DedupeCoordinator {
    /// Wraps a dedupe store.
    pub fn new(store: Arc<dyn DedupeStore>) -> Self {
        DedupeCoordinator { store }
    }

    /// Runs the claim protocol: share an available result, otherwise
    /// register-or-join, and as a joiner block on the owner's completion.
    pub async fn claim(&self, key: &Fingerprint) -> StoreResult<Claim> {
        if let Some(value) = self.store.wait_for(key).await? {
            debug!(key = %key, "joined in-flight request");
            return Ok(Claim::Shared(value));
        }

        let handle = self.store.register_or_join(key).await?;
        if handle.is_owner {
            return Ok(Claim::Owner {
                job_id: handle.job_id,
            });
        }

        // Lost the registration race: block on the winner.
        match self.store.wait_for(key).await? {
            Some(value) => Ok(Claim::Shared(value)),
            None => {
                debug!(key = %key, "joined owner failed");
                Ok(Claim::UpstreamFailed)
            }
        }
    }

    /// Settles the owned job with a value. Idempotent at the store.
    pub async fn complete(&self, key: &Fingerprint, value: Payload) -> StoreResult<()> {
        self.store.complete(key, value).await
    }

    /// Settles the owned job as failed; joiners observe absence.
    pub async fn fail(&self, key: &Fingerprint, error: String) -> StoreResult<()> {
        self.store.fail(key, error).await
    }
}
