//! Retry policy for the fetch attempt.
//!
//! Wraps only the fetch; cache and dedupe phases never retry. Delays grow
//! exponentially with optional full jitter, and a server-provided
//! `Retry-After` always wins when it asks for more than the local delay.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;

use crate::error::Error;

/// Statuses retried by default, alongside network failures.
const DEFAULT_RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Jitter mode for computed delays.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Replace the capped delay with a uniform draw from `[0, capped)`.
    #[default]
    Full,
    /// Use the capped delay as-is.
    None,
}

/// Custom retryability predicate.
pub type RetryCondition = Arc<dyn Fn(&Error) -> bool + Send + Sync>;

/// Observer invoked before each retry sleep with (attempt, error).
pub type OnRetry = Arc<dyn Fn(u32, &Error) + Send + Sync>;

/// Exponential backoff configuration.
#[derive(Clone)]
pub struct RetryPolicy {
    /// First-attempt delay; doubles each attempt.
    pub base_delay: Duration,
    /// Upper bound on the computed delay.
    pub max_delay: Duration,
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Jitter mode.
    pub jitter: Jitter,
    /// Replaces the default retryable set when present.
    pub retry_condition: Option<RetryCondition>,
    /// Called before each retry sleep.
    pub on_retry: Option<OnRetry>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(10),
            max_retries: 3,
            jitter: Jitter::Full,
            retry_condition: None,
            on_retry: None,
        }
    }
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("max_retries", &self.max_retries)
            .field("jitter", &self.jitter)
            .field("retry_condition", &self.retry_condition.is_some())
            .field("on_retry", &self.on_retry.is_some())
            .finish()
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        }
    }

    /// Whether `error` warrants another attempt after `attempt` attempts.
    ///
    /// Aborts never retry, regardless of any custom condition.
    pub fn should_retry(&self, error: &Error, attempt: u32) -> bool {
        if attempt > self.max_retries {
            return false;
        }
        if matches!(error, Error::Aborted) {
            return false;
        }
        match &self.retry_condition {
            Some(condition) => condition(error),
            None => match error {
                Error::Network(_) => true,
                Error::Http { status, .. } => DEFAULT_RETRYABLE_STATUSES.contains(status),
                _ => false,
            },
        }
    }

    /// The capped exponential delay for `attempt` (1-based), with jitter
    /// applied.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let uncapped = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent));
        let capped = uncapped.min(self.max_delay);
        match self.jitter {
            Jitter::None => capped,
            Jitter::Full => {
                let capped_ms = capped.as_millis() as u64;
                if capped_ms == 0 {
                    return Duration::ZERO;
                }
                Duration::from_millis(rand::rng().random_range(0..capped_ms))
            }
        }
    }

    /// The delay to actually sleep: the jittered local delay, except when
    /// the server asked for more.
    pub fn delay_for(&self, attempt: u32, server_retry_after: Option<Duration>) -> Duration {
        let local = self.backoff_delay(attempt);
        match server_retry_after {
            Some(server) if server > local => server,
            _ => local,
        }
    }
}
