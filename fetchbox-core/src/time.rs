//! Epoch-millisecond time helpers and HTTP-date parsing.
//!
//! All freshness math happens in integer milliseconds; seconds appear only
//! at comparison and TTL boundaries.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Parses an HTTP-date (IMF-fixdate, RFC 850, or asctime) to epoch ms.
pub fn parse_http_date_ms(value: &str) -> Option<i64> {
    let parsed = httpdate::parse_http_date(value.trim()).ok()?;
    system_time_ms(parsed)
}

/// Parses an `Expires` header value.
///
/// Invalid values such as the widely used `Expires: 0` denote an
/// already-expired response and map to `Some(0)`; only an absent header
/// yields `None` at the call site.
pub fn parse_expires_ms(value: &str) -> i64 {
    parse_http_date_ms(value).unwrap_or(0)
}

fn system_time_ms(time: SystemTime) -> Option<i64> {
    match time.duration_since(UNIX_EPOCH) {
        Ok(since) => i64::try_from(since.as_millis()).ok(),
        // Pre-epoch dates are valid HTTP-dates; clamp into range.
        Err(err) => i64::try_from(err.duration().as_millis()).ok().map(|ms| -ms),
    }
}

/// Converts epoch ms to a `SystemTime`, for interop with `httpdate`.
pub fn ms_to_system_time(ms: i64) -> SystemTime {
    if ms >= 0 {
        UNIX_EPOCH + Duration::from_millis(ms as u64)
    } else {
        UNIX_EPOCH - Duration::from_millis(ms.unsigned_abs())
    }
}
