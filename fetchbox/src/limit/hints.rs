//! Server rate-limit hint parsing.
//!
//! Servers advertise limits through several header families; the governor
//! turns them into per-origin cooldowns. Family names are configurable and
//! user-supplied names are consulted before the defaults.

use http::HeaderMap;
use serde::{Deserialize, Serialize};

use fetchbox_core::time::parse_http_date_ms;

/// Header family names checked for rate-limit hints, in order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitHeaders {
    /// `Retry-After` family.
    pub retry_after: Vec<String>,
    /// Window limit family.
    pub limit: Vec<String>,
    /// Remaining-slots family.
    pub remaining: Vec<String>,
    /// Window reset family.
    pub reset: Vec<String>,
    /// Combined `RateLimit: r=<n>, t=<n>` family.
    pub combined: Vec<String>,
}

impl Default for RateLimitHeaders {
    fn default() -> Self {
        RateLimitHeaders {
            retry_after: vec!["retry-after".into()],
            limit: vec!["ratelimit-limit".into(), "x-ratelimit-limit".into()],
            remaining: vec!["ratelimit-remaining".into(), "x-ratelimit-remaining".into()],
            reset: vec!["ratelimit-reset".into(), "x-ratelimit-reset".into()],
            combined: vec!["ratelimit".into()],
        }
    }
}

impl RateLimitHeaders {
    /// Prepends user-supplied names (lowercased) to the defaults.
    pub fn with_custom(custom: RateLimitHeaders) -> Self {
        let defaults = RateLimitHeaders::default();
        let prepend = |mut user: Vec<String>, default: Vec<String>| {
            user.iter_mut().for_each(|name| *name = name.to_lowercase());
            user.extend(default);
            user
        };
        RateLimitHeaders {
            retry_after: prepend(custom.retry_after, defaults.retry_after),
            limit: prepend(custom.limit, defaults.limit),
            remaining: prepend(custom.remaining, defaults.remaining),
            reset: prepend(custom.reset, defaults.reset),
            combined: prepend(custom.combined, defaults.combined),
        }
    }
}

/// Hints parsed from one response.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ServerHints {
    /// `Retry-After`, as a delta from now.
    pub retry_after_ms: Option<u64>,
    /// Window reset, as a delta from now.
    pub reset_ms: Option<u64>,
    /// Remaining slots in the server's window.
    pub remaining: Option<i64>,
    /// The server's window limit.
    pub limit: Option<u64>,
}

impl ServerHints {
    /// The cooldown this response demands, if any.
    ///
    /// `Retry-After` always engages a cooldown. A reset hint engages one
    /// only when the response says the window is exhausted: a 429/503
    /// status or a non-positive remaining count.
    pub fn cooldown_ms(&self, status: u16) -> Option<u64> {
        if let Some(retry_after) = self.retry_after_ms {
            return Some(retry_after);
        }
        let reset = self.reset_ms?;
        let exhausted = matches!(status, 429 | 503) || self.remaining.is_some_and(|r| r <= 0);
        exhausted.then_some(reset)
    }
}

/// Parses rate-limit hints from response headers.
pub fn parse_hints(headers: &HeaderMap, families: &RateLimitHeaders, now_ms: i64) -> ServerHints {
    let mut hints = ServerHints {
        retry_after_ms: first_value(headers, &families.retry_after)
            .and_then(|value| parse_retry_after_ms(value, now_ms)),
        reset_ms: first_value(headers, &families.reset)
            .and_then(|value| parse_reset_ms(value, now_ms)),
        remaining: first_value(headers, &families.remaining)
            .and_then(|value| value.trim().parse::<i64>().ok()),
        limit: first_value(headers, &families.limit)
            .and_then(|value| value.trim().parse::<u64>().ok()),
    };

    if let Some(combined) = first_value(headers, &families.combined) {
        let (remaining, reset_secs) = parse_combined(combined);
        if hints.remaining.is_none() {
            hints.remaining = remaining;
        }
        if hints.reset_ms.is_none() {
            hints.reset_ms = reset_secs.map(|secs| secs.saturating_mul(1000));
        }
    }
    hints
}

fn first_value<'h>(headers: &'h HeaderMap, names: &[String]) -> Option<&'h str> {
    names
        .iter()
        .find_map(|name| headers.get(name.as_str()))
        .and_then(|value| value.to_str().ok())
}

/// `Retry-After`: integer seconds, or an HTTP-date converted to a delta.
fn parse_retry_after_ms(value: &str, now_ms: i64) -> Option<u64> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(seconds.saturating_mul(1000));
    }
    let date_ms = parse_http_date_ms(value)?;
    Some((date_ms - now_ms).max(0) as u64)
}

/// Reset headers: an integer that is absolute epoch seconds when strictly
/// beyond now+1s, and relative seconds otherwise.
fn parse_reset_ms(value: &str, now_ms: i64) -> Option<u64> {
    let raw = value.trim().parse::<i64>().ok()?;
    let now_secs = now_ms / 1000;
    if raw > now_secs + 1 {
        Some(raw.saturating_mul(1000).saturating_sub(now_ms).max(0) as u64)
    } else {
        Some((raw.max(0) as u64).saturating_mul(1000))
    }
}

/// The combined `RateLimit` form: `r=<remaining>, t=<reset-seconds>`.
fn parse_combined(value: &str) -> (Option<i64>, Option<u64>) {
    let mut remaining = None;
    let mut reset = None;
    for part in value.split([',', ';']) {
        let part = part.trim();
        if let Some((key, raw)) = part.split_once('=') {
            match key.trim() {
                "r" => remaining = raw.trim().parse::<i64>().ok(),
                "t" => reset = raw.trim().parse::<u64>().ok(),
                _ => {}
            }
        }
    }
    (remaining, reset)
}
