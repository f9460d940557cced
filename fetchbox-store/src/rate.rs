//! The rate-limit store capability.

use std::time::Duration;

use async_trait::async_trait;
use fetchbox_core::CapacityAllocation;
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;

/// Request priority for per-priority accounting.
///
/// Basic stores ignore priority entirely; adaptive stores split capacity
/// between the two classes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Interactive traffic.
    User,
    /// Prefetching, refresh, and other deferrable traffic.
    #[default]
    Background,
}

impl Priority {
    /// Lowercase label for logs and store keys.
    pub fn as_str(self) -> &'static str {
        match self {
            Priority::User => "user",
            Priority::Background => "background",
        }
    }
}

/// Result of an atomic [`RateLimitStore::acquire`] attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// A slot was granted and recorded; callers must not `record` again.
    Granted,
    /// No slot is available right now.
    Denied,
    /// The store has no atomic acquire; fall back to check-then-record.
    Unsupported,
}

/// Snapshot of a resource's rate-limit state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RateLimitStatus {
    /// Slots still available in the current window.
    pub remaining: u32,
    /// When the window frees its oldest slot, epoch ms.
    pub reset_at: i64,
    /// Total window limit.
    pub limit: u32,
    /// Current adaptive split, when the store is adaptive.
    pub adaptive: Option<CapacityAllocation>,
}

/// Sliding-window admission storage keyed by resource name.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Whether a request of `priority` may proceed right now. Does not
    /// record anything.
    async fn can_proceed(&self, resource: &str, priority: Priority) -> StoreResult<bool>;

    /// Atomic check-and-record, when the store supports it.
    ///
    /// The default implementation reports [`AcquireOutcome::Unsupported`],
    /// directing callers to the check-then-record path with its documented
    /// weaker guarantee.
    async fn acquire(&self, resource: &str, priority: Priority) -> StoreResult<AcquireOutcome> {
        let _ = (resource, priority);
        Ok(AcquireOutcome::Unsupported)
    }

    /// Records an admitted request.
    async fn record(&self, resource: &str, priority: Priority) -> StoreResult<()>;

    /// How long until a blocked request could proceed. `None` when the
    /// store cannot tell (callers apply a polling floor).
    async fn wait_time(&self, resource: &str, priority: Priority)
        -> StoreResult<Option<Duration>>;

    /// Current window snapshot for `resource`.
    async fn status(&self, resource: &str) -> StoreResult<RateLimitStatus>;
}
