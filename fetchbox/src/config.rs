//! Request-level configuration.

use std::time::Duration;

use fetchbox_core::{CacheOverrides, ParamValue};
use fetchbox_store::Priority;
use http::{HeaderMap, HeaderName, HeaderValue};

use crate::retry::RetryPolicy;
use crate::signal::AbortSignal;

/// Per-request retry override.
#[derive(Clone, Debug, Default)]
pub enum RetryOverride {
    /// Use the client's retry policy.
    #[default]
    Inherit,
    /// Disable retries for this request.
    Disabled,
    /// Replace the client's policy for this request.
    Policy(RetryPolicy),
}

/// Options for a single `get`.
///
/// Everything is optional; per-request values merge over the client's
/// construction-time defaults.
#[derive(Clone, Debug, Default)]
pub struct RequestOptions {
    /// Cancellation signal covering every wait in the request.
    pub signal: Option<AbortSignal>,
    /// Rate-limit priority. Defaults to background.
    pub priority: Priority,
    /// Request headers, merged over the client's default headers.
    pub headers: HeaderMap,
    /// Extra query parameters appended to the URL.
    pub params: Vec<(String, ParamValue)>,
    /// Retry behavior for this request.
    pub retry: RetryOverride,
    /// Replaces the client's default cache TTL fallback for this request.
    pub cache_ttl: Option<Duration>,
    /// Cache overrides merged over the client's defaults.
    pub cache_overrides: Option<CacheOverrides>,
}

impl RequestOptions {
    /// Empty options: background priority, no signal, inherit retries.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Marks the request user-priority.
    pub fn user(self) -> Self {
        self.priority(Priority::User)
    }

    /// Attaches an abort signal.
    pub fn signal(mut self, signal: AbortSignal) -> Self {
        self.signal = Some(signal);
        self
    }

    /// Adds a request header. Invalid names or values are ignored.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) {
            self.headers.append(name, value);
        }
        self
    }

    /// Adds a query parameter. Pass [`ParamValue::Null`] to keep the key
    /// with no value; omit the call entirely for "undefined".
    pub fn param(mut self, name: &str, value: impl Into<ParamValue>) -> Self {
        self.params.push((name.to_owned(), value.into()));
        self
    }

    /// Disables retries for this request.
    pub fn no_retry(mut self) -> Self {
        self.retry = RetryOverride::Disabled;
        self
    }

    /// Replaces the retry policy for this request.
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = RetryOverride::Policy(policy);
        self
    }

    /// Overrides the default cache TTL fallback.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    /// Sets cache overrides for this request.
    pub fn cache_overrides(mut self, overrides: CacheOverrides) -> Self {
        self.cache_overrides = Some(overrides);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_accumulates() {
        let options = RequestOptions::new()
            .user()
            .header("accept", "application/json")
            .param("page", 2)
            .param("flag", ParamValue::Null)
            .no_retry();
        assert_eq!(options.priority, Priority::User);
        assert_eq!(options.headers.get("accept").unwrap(), "application/json");
        assert_eq!(options.params.len(), 2);
        assert!(matches!(options.retry, RetryOverride::Disabled));
    }

    #[test]
    fn defaults_are_background_and_inherit() {
        let options = RequestOptions::default();
        assert_eq!(options.priority, Priority::Background);
        assert!(matches!(options.retry, RetryOverride::Inherit));
        assert!(options.signal.is_none());
    }
}
