//! The rate governor: server-advertised cooldowns combined with
//! store-backed sliding-window admission.
//!
//! Admission has two phases. The cooldown phase consults the per-origin
//! cooldown map before any store call; the store phase prefers an atomic
//! `acquire` and falls back to check-then-record with a polling wait.
//! Both phases draw on one cumulative wait budget per request and race the
//! caller's abort signal.

mod cooldown;
mod hints;

pub use cooldown::CooldownMap;
pub use hints::{parse_hints, RateLimitHeaders, ServerHints};

use std::sync::Arc;
use std::time::{Duration, Instant};

use fetchbox_store::{AcquireOutcome, Priority, RateLimitStore};
use http::HeaderMap;
use tracing::debug;

use crate::error::Error;
use crate::signal::{sleep_abortable, AbortSignal};

/// Polling floor when a store reports blocked without a wait estimate.
const POLL_FLOOR: Duration = Duration::from_millis(25);

/// Cumulative wait budget for one request across cooldown and admission.
#[derive(Debug)]
pub struct WaitBudget {
    started: Instant,
    max_wait: Duration,
}

impl WaitBudget {
    /// Starts a budget of `max_wait`.
    pub fn start(max_wait: Duration) -> Self {
        WaitBudget {
            started: Instant::now(),
            max_wait,
        }
    }

    fn waited_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Time left, or a budget-exhausted error.
    fn remaining(&self) -> Result<Duration, Error> {
        self.max_wait
            .checked_sub(self.started.elapsed())
            .filter(|left| !left.is_zero())
            .ok_or(Error::BudgetExhausted {
                waited_ms: self.waited_ms(),
            })
    }
}

/// Outcome of a successful admission.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    /// Whether the slot is already recorded (atomic acquire, or no store
    /// configured). When set, the pipeline must not call `record` again.
    pub recorded: bool,
}

/// Combines the cooldown map with a store-backed sliding-window limiter.
pub struct RateGovernor {
    store: Option<Arc<dyn RateLimitStore>>,
    cooldowns: CooldownMap,
    headers: RateLimitHeaders,
    throw_on_rate_limit: bool,
    max_wait: Duration,
}

impl std::fmt::Debug for RateGovernor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateGovernor")
            .field("store", &self.store.is_some())
            .field("throw_on_rate_limit", &self.throw_on_rate_limit)
            .field("max_wait", &self.max_wait)
            .finish()
    }
}

impl RateGovernor {
    /// Builds a governor. `max_wait` is the per-request cumulative budget.
    pub fn new(
        store: Option<Arc<dyn RateLimitStore>>,
        headers: RateLimitHeaders,
        throw_on_rate_limit: bool,
        max_wait: Duration,
    ) -> Self {
        RateGovernor {
            store,
            cooldowns: CooldownMap::new(),
            headers,
            throw_on_rate_limit,
            max_wait,
        }
    }

    /// Starts the wait budget for one request.
    pub fn budget(&self) -> WaitBudget {
        WaitBudget::start(self.max_wait)
    }

    /// Cooldown phase: block (or refuse) while the origin is cooling down.
    ///
    /// `forced_wait` is set by the retry loop so a retry never converts a
    /// cooldown into an error and never bypasses it.
    pub async fn enforce_cooldown(
        &self,
        origin: &str,
        resource: &str,
        signal: Option<&AbortSignal>,
        forced_wait: bool,
        budget: &WaitBudget,
    ) -> Result<(), Error> {
        loop {
            let Some(remaining_ms) = self
                .cooldowns
                .remaining_ms(origin, fetchbox_core::now_ms())
            else {
                return Ok(());
            };
            if self.throw_on_rate_limit && !forced_wait {
                return Err(Error::RateLimited {
                    resource: resource.to_owned(),
                    wait_ms: remaining_ms,
                });
            }
            let left = budget.remaining()?;
            let sleep = Duration::from_millis(remaining_ms).min(left);
            debug!(origin, remaining_ms, "waiting out server cooldown");
            sleep_abortable(sleep, signal).await?;
            // Re-check: the budget may have run out mid-cooldown, or the
            // cooldown may have been extended by a concurrent response.
            budget.remaining()?;
        }
    }

    /// Store admission phase.
    pub async fn admit(
        &self,
        resource: &str,
        priority: Priority,
        signal: Option<&AbortSignal>,
        budget: &WaitBudget,
    ) -> Result<Admission, Error> {
        let Some(store) = &self.store else {
            return Ok(Admission { recorded: true });
        };

        match store.acquire(resource, priority).await? {
            AcquireOutcome::Granted => Ok(Admission { recorded: true }),
            AcquireOutcome::Denied => {
                let recorded = self
                    .wait_for_slot(store, resource, priority, signal, budget)
                    .await?;
                Ok(Admission { recorded })
            }
            AcquireOutcome::Unsupported => {
                // Check-then-record path: the store has no atomic acquire,
                // and the pipeline accepts the documented weaker guarantee.
                if store.can_proceed(resource, priority).await? {
                    return Ok(Admission { recorded: false });
                }
                let recorded = self
                    .wait_for_slot(store, resource, priority, signal, budget)
                    .await?;
                Ok(Admission { recorded })
            }
        }
    }

    /// Refusal or poll-and-wait loop for a blocked admission.
    ///
    /// Returns whether the winning slot was recorded atomically.
    async fn wait_for_slot(
        &self,
        store: &Arc<dyn RateLimitStore>,
        resource: &str,
        priority: Priority,
        signal: Option<&AbortSignal>,
        budget: &WaitBudget,
    ) -> Result<bool, Error> {
        if self.throw_on_rate_limit {
            let wait = store
                .wait_time(resource, priority)
                .await?
                .unwrap_or(POLL_FLOOR);
            return Err(Error::RateLimited {
                resource: resource.to_owned(),
                wait_ms: wait.as_millis() as u64,
            });
        }

        loop {
            let left = budget.remaining()?;
            let reported = store.wait_time(resource, priority).await?;
            let wait = match reported {
                Some(reported) if !reported.is_zero() => reported,
                // Blocked without a usable estimate: poll at the floor.
                _ => POLL_FLOOR,
            }
            .min(left);
            debug!(
                resource,
                priority = priority.as_str(),
                wait_ms = wait.as_millis() as u64,
                "rate limited; waiting"
            );
            sleep_abortable(wait, signal).await?;

            match store.acquire(resource, priority).await? {
                AcquireOutcome::Granted => return Ok(true),
                AcquireOutcome::Denied => continue,
                AcquireOutcome::Unsupported => {
                    if store.can_proceed(resource, priority).await? {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// Records an admitted request on the check-then-record path.
    pub async fn record(&self, resource: &str, priority: Priority) -> Result<(), Error> {
        if let Some(store) = &self.store {
            store.record(resource, priority).await?;
        }
        Ok(())
    }

    /// Applies server hints from a response, engaging a cooldown when the
    /// hints demand one. Returns the engaged cooldown for retry pacing.
    pub fn apply_hints(
        &self,
        origin: &str,
        status: u16,
        response_headers: &HeaderMap,
    ) -> Option<Duration> {
        let now = fetchbox_core::now_ms();
        let hints = parse_hints(response_headers, &self.headers, now);
        let cooldown_ms = hints.cooldown_ms(status)?;
        debug!(origin, status, cooldown_ms, "server hint engaged cooldown");
        self.cooldowns.engage(origin, now + cooldown_ms as i64);
        Some(Duration::from_millis(cooldown_ms))
    }

    /// Remaining cooldown for an origin, if one is active.
    pub fn cooldown_remaining(&self, origin: &str) -> Option<Duration> {
        self.cooldowns
            .remaining_ms(origin, fetchbox_core::now_ms())
            .map(Duration::from_millis)
    }

    /// Drops all cooldowns.
    pub fn clear_cooldowns(&self) {
        self.cooldowns.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use fetchbox_store::{RateLimitStatus, StoreResult};
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Store that denies the first N acquire calls, then grants.
    struct DenyThenGrant {
        denials: AtomicU32,
    }

    #[async_trait]
    impl RateLimitStore for DenyThenGrant {
        async fn can_proceed(&self, _: &str, _: Priority) -> StoreResult<bool> {
            Ok(true)
        }
        async fn acquire(&self, _: &str, _: Priority) -> StoreResult<AcquireOutcome> {
            let remaining = self.denials.load(Ordering::SeqCst);
            if remaining > 0 {
                self.denials.store(remaining - 1, Ordering::SeqCst);
                Ok(AcquireOutcome::Denied)
            } else {
                Ok(AcquireOutcome::Granted)
            }
        }
        async fn record(&self, _: &str, _: Priority) -> StoreResult<()> {
            Ok(())
        }
        async fn wait_time(&self, _: &str, _: Priority) -> StoreResult<Option<Duration>> {
            Ok(Some(Duration::from_millis(1)))
        }
        async fn status(&self, _: &str) -> StoreResult<RateLimitStatus> {
            Ok(RateLimitStatus {
                remaining: 0,
                reset_at: 0,
                limit: 0,
                adaptive: None,
            })
        }
    }

    fn governor(store: Option<Arc<dyn RateLimitStore>>, throw: bool) -> RateGovernor {
        RateGovernor::new(store, RateLimitHeaders::default(), throw, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn no_store_elides_admission() {
        let governor = governor(None, false);
        let budget = governor.budget();
        let admission = governor
            .admit("items", Priority::Background, None, &budget)
            .await
            .unwrap();
        assert!(admission.recorded);
    }

    #[tokio::test]
    async fn denied_acquire_waits_then_grants() {
        let store = Arc::new(DenyThenGrant {
            denials: AtomicU32::new(2),
        });
        let governor = governor(Some(store), false);
        let budget = governor.budget();
        let admission = governor
            .admit("items", Priority::User, None, &budget)
            .await
            .unwrap();
        assert!(admission.recorded);
    }

    #[tokio::test]
    async fn throw_on_rate_limit_refuses_immediately() {
        let store = Arc::new(DenyThenGrant {
            denials: AtomicU32::new(u32::MAX),
        });
        let governor = governor(Some(store), true);
        let budget = governor.budget();
        let err = governor
            .admit("items", Priority::User, None, &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::RateLimited { .. }));
    }

    #[tokio::test]
    async fn cooldown_throws_when_configured() {
        let governor = governor(None, true);
        let now = fetchbox_core::now_ms();
        governor.cooldowns.engage("https://a:443", now + 5_000);
        let budget = governor.budget();
        let err = governor
            .enforce_cooldown("https://a:443", "items", None, false, &budget)
            .await
            .unwrap_err();
        match err {
            Error::RateLimited { wait_ms, .. } => assert!(wait_ms > 4_000 && wait_ms <= 5_000),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn forced_wait_sleeps_through_cooldown() {
        let governor = governor(None, true);
        let now = fetchbox_core::now_ms();
        governor.cooldowns.engage("https://a:443", now + 50);
        let budget = governor.budget();
        governor
            .enforce_cooldown("https://a:443", "items", None, true, &budget)
            .await
            .unwrap();
        assert!(governor.cooldown_remaining("https://a:443").is_none());
    }

    #[tokio::test]
    async fn budget_exhaustion_fails() {
        let governor = RateGovernor::new(
            None,
            RateLimitHeaders::default(),
            false,
            Duration::from_millis(40),
        );
        let now = fetchbox_core::now_ms();
        governor.cooldowns.engage("o", now + 60_000);
        let budget = governor.budget();
        let err = governor
            .enforce_cooldown("o", "items", None, false, &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BudgetExhausted { .. }));
    }

    #[tokio::test]
    async fn abort_interrupts_cooldown_wait() {
        let governor = governor(None, false);
        let now = fetchbox_core::now_ms();
        governor.cooldowns.engage("o", now + 60_000);
        let (handle, signal) = crate::signal::abort_pair();
        handle.abort();
        let budget = governor.budget();
        let err = governor
            .enforce_cooldown("o", "items", Some(&signal), false, &budget)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Aborted));
    }

    #[tokio::test]
    async fn hints_engage_cooldowns() {
        let governor = governor(None, false);
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", "1".parse().unwrap());
        let engaged = governor.apply_hints("https://a:443", 429, &headers).unwrap();
        assert_eq!(engaged, Duration::from_secs(1));
        let remaining = governor.cooldown_remaining("https://a:443").unwrap();
        assert!(remaining <= Duration::from_secs(1));
        assert!(remaining > Duration::from_millis(900));
    }
}
