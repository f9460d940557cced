//! In-memory sliding-window rate-limit store, with an optional adaptive
//! priority-aware mode.
//!
//! Each resource owns a window of request timestamps behind an async mutex,
//! which is what makes `acquire` an atomic check-and-record. In adaptive
//! mode the window doubles as the activity metrics fed to the capacity
//! calculator; the resulting allocation is cached and recomputed at most
//! once per recalculation interval.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use fetchbox_core::adaptive::{self, AdaptiveConfig, AdaptiveConfigError, CapacityAllocation};
use fetchbox_core::{now_ms, ActivityMetrics};
use fetchbox_store::{AcquireOutcome, Priority, RateLimitStatus, RateLimitStore, StoreResult};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

/// Sliding-window configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub limit: u32,
    /// Window length.
    #[serde(with = "humantime_serde")]
    pub window: Duration,
    /// Per-resource overrides, keyed by resource name.
    pub resources: HashMap<String, ResourceLimits>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        RateLimitConfig {
            limit: 60,
            window: Duration::from_secs(60),
            resources: HashMap::new(),
        }
    }
}

/// Overrides for a single resource.
///
/// This is also where multi-segment endpoints that infer to the same last
/// path segment get their own budgets.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceLimits {
    /// Requests allowed per window for this resource.
    pub limit: Option<u32>,
    /// Window length for this resource.
    #[serde(with = "humantime_serde::option")]
    pub window: Option<Duration>,
}

#[derive(Debug)]
struct CachedCapacity {
    allocation: CapacityAllocation,
    computed_at: i64,
}

#[derive(Debug, Default)]
struct ResourceState {
    metrics: ActivityMetrics,
    capacity: Option<CachedCapacity>,
}

/// In-process rate-limit store.
#[derive(Debug)]
pub struct MemoryRateStore {
    config: RateLimitConfig,
    adaptive: Option<AdaptiveConfig>,
    resources: DashMap<String, Arc<Mutex<ResourceState>>>,
}

impl MemoryRateStore {
    /// Creates a basic sliding-window store; priority is ignored.
    pub fn new(config: RateLimitConfig) -> Self {
        MemoryRateStore {
            config,
            adaptive: None,
            resources: DashMap::new(),
        }
    }

    /// Creates an adaptive store that splits each window between user and
    /// background traffic.
    pub fn adaptive(
        config: RateLimitConfig,
        adaptive: AdaptiveConfig,
    ) -> Result<Self, AdaptiveConfigError> {
        adaptive.validate()?;
        Ok(MemoryRateStore {
            config,
            adaptive: Some(adaptive),
            resources: DashMap::new(),
        })
    }

    /// Forgets a resource's window, metrics, and cached capacity.
    pub fn reset(&self, resource: &str) {
        self.resources.remove(resource);
    }

    /// Forgets every resource.
    pub fn clear(&self) {
        self.resources.clear();
    }

    fn limits_for(&self, resource: &str) -> (u32, i64) {
        let overrides = self.config.resources.get(resource);
        let limit = overrides
            .and_then(|o| o.limit)
            .unwrap_or(self.config.limit);
        let window = overrides
            .and_then(|o| o.window)
            .unwrap_or(self.config.window);
        (limit, window.as_millis() as i64)
    }

    fn state(&self, resource: &str) -> Arc<Mutex<ResourceState>> {
        self.resources
            .entry(resource.to_owned())
            .or_default()
            .clone()
    }

    /// Current allocation for an adaptive store, recomputed at most once
    /// per recalculation interval and otherwise read from the cache.
    fn allocation(
        &self,
        state: &mut ResourceState,
        limit: u32,
        now: i64,
    ) -> Option<CapacityAllocation> {
        let cfg = self.adaptive.as_ref()?;
        let interval_ms = cfg.recalculation_interval.as_millis() as i64;
        let fresh = state
            .capacity
            .as_ref()
            .is_some_and(|cached| now - cached.computed_at < interval_ms);
        if !fresh {
            let allocation = adaptive::calculate(limit, &state.metrics, cfg, now);
            debug!(
                user_reserved = allocation.user_reserved,
                background_max = allocation.background_max,
                background_paused = allocation.background_paused,
                reason = %allocation.reason,
                "recomputed adaptive capacity"
            );
            state.capacity = Some(CachedCapacity {
                allocation,
                computed_at: now,
            });
        }
        state.capacity.as_ref().map(|c| c.allocation.clone())
    }

    fn admit(
        &self,
        state: &mut ResourceState,
        resource: &str,
        priority: Priority,
        now: i64,
    ) -> bool {
        let (limit, window_ms) = self.limits_for(resource);
        state.metrics.prune(window_ms, now);
        let user = state.metrics.recent_user_count(window_ms, now);
        let background = state.metrics.recent_background_count(window_ms, now);

        match self.allocation(state, limit, now) {
            Some(allocation) => match priority {
                Priority::Background => {
                    !allocation.background_paused && background < allocation.background_max
                }
                // Users admit against their reservation, and may borrow
                // idle capacity up to the total limit.
                Priority::User => user < allocation.user_reserved || user + background < limit,
            },
            None => user + background < limit,
        }
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateStore {
    async fn can_proceed(&self, resource: &str, priority: Priority) -> StoreResult<bool> {
        let state = self.state(resource);
        let mut state = state.lock().await;
        Ok(self.admit(&mut state, resource, priority, now_ms()))
    }

    async fn acquire(&self, resource: &str, priority: Priority) -> StoreResult<AcquireOutcome> {
        let state = self.state(resource);
        let mut state = state.lock().await;
        let now = now_ms();
        if self.admit(&mut state, resource, priority, now) {
            match priority {
                Priority::User => state.metrics.record_user(now),
                Priority::Background => state.metrics.record_background(now),
            }
            Ok(AcquireOutcome::Granted)
        } else {
            Ok(AcquireOutcome::Denied)
        }
    }

    async fn record(&self, resource: &str, priority: Priority) -> StoreResult<()> {
        let state = self.state(resource);
        let mut state = state.lock().await;
        let now = now_ms();
        match priority {
            Priority::User => state.metrics.record_user(now),
            Priority::Background => state.metrics.record_background(now),
        }
        let (_, window_ms) = self.limits_for(resource);
        state.metrics.prune(window_ms, now);
        Ok(())
    }

    async fn wait_time(
        &self,
        resource: &str,
        priority: Priority,
    ) -> StoreResult<Option<Duration>> {
        let state = self.state(resource);
        let mut state = state.lock().await;
        let now = now_ms();
        if self.admit(&mut state, resource, priority, now) {
            return Ok(Some(Duration::ZERO));
        }
        let (_, window_ms) = self.limits_for(resource);
        // Blocked: the next slot frees when the oldest in-window sample
        // leaves the window. A paused background split has no deadline of
        // its own; report no estimate and let callers poll.
        let oldest = state
            .metrics
            .user_samples()
            .first()
            .copied()
            .into_iter()
            .chain(state.metrics.background_samples().first().copied())
            .min();
        match oldest {
            Some(oldest) => {
                let ready_in = (oldest + window_ms - now).max(0) as u64;
                Ok(Some(Duration::from_millis(ready_in)))
            }
            None => Ok(None),
        }
    }

    async fn status(&self, resource: &str) -> StoreResult<RateLimitStatus> {
        let state = self.state(resource);
        let mut state = state.lock().await;
        let now = now_ms();
        let (limit, window_ms) = self.limits_for(resource);
        state.metrics.prune(window_ms, now);
        let used = state.metrics.recent_user_count(window_ms, now)
            + state.metrics.recent_background_count(window_ms, now);
        let oldest = state
            .metrics
            .user_samples()
            .first()
            .copied()
            .into_iter()
            .chain(state.metrics.background_samples().first().copied())
            .min();
        Ok(RateLimitStatus {
            remaining: limit.saturating_sub(used),
            reset_at: oldest.map(|ts| ts + window_ms).unwrap_or(now),
            limit,
            adaptive: self.allocation(&mut state, limit, now),
        })
    }
}
