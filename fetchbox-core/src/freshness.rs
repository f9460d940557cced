//! The freshness engine: age computation, freshness lifetime, and the
//! classification that drives the request pipeline.
//!
//! Classification is a pure function of the entry metadata, the current
//! time, and the cache overrides, with no hidden state. Math runs in integer
//! milliseconds and converts to seconds only at comparison and TTL
//! boundaries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::entry::CacheEntry;
use crate::time::parse_http_date_ms;

/// Freshness classification of a cached entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Within the freshness lifetime; serve directly.
    Fresh,
    /// Beyond every tolerance window; fetch, no fallback.
    Stale,
    /// `no-cache`: revalidate before use.
    NoCache,
    /// `must-revalidate`: revalidate before use, no stale tolerance.
    MustRevalidate,
    /// Within the stale-while-revalidate window: serve stale, refresh in
    /// the background.
    StaleWhileRevalidate,
    /// Within the stale-if-error window: fetch, fall back to stale on
    /// server error or network failure.
    StaleIfError,
}

/// Per-request or per-client cache behavior overrides.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheOverrides {
    /// Cache responses despite `Cache-Control: no-store`.
    pub ignore_no_store: bool,
    /// Serve entries marked `no-cache` as if fresh.
    pub ignore_no_cache: bool,
    /// Lower bound on the store TTL, seconds.
    pub minimum_ttl: Option<u64>,
    /// Upper bound on the store TTL, seconds.
    pub maximum_ttl: Option<u64>,
}

impl CacheOverrides {
    /// Merges per-request overrides over construction-time defaults. Set
    /// flags and bounds on `other` win.
    pub fn merged_with(&self, other: &CacheOverrides) -> CacheOverrides {
        CacheOverrides {
            ignore_no_store: self.ignore_no_store || other.ignore_no_store,
            ignore_no_cache: self.ignore_no_cache || other.ignore_no_cache,
            minimum_ttl: other.minimum_ttl.or(self.minimum_ttl),
            maximum_ttl: other.maximum_ttl.or(self.maximum_ttl),
        }
    }
}

/// Current age of the entry in seconds: corrected initial age plus resident
/// time.
pub fn current_age_secs(entry: &CacheEntry, now_ms: i64) -> u64 {
    let apparent_ms = (entry.stored_at - entry.response_date).max(0) as u64;
    let corrected_initial_ms = apparent_ms.max(entry.age_header.saturating_mul(1000));
    let resident_ms = (now_ms - entry.stored_at).max(0) as u64;
    corrected_initial_ms.saturating_add(resident_ms) / 1000
}

/// Freshness lifetime of the entry in seconds, for a private cache.
///
/// Priority: `max-age`, then `Expires` relative to the response date, then
/// the 10% last-modified heuristic. `s-maxage` is shared-cache-only and
/// intentionally ignored.
pub fn freshness_lifetime_secs(entry: &CacheEntry) -> u64 {
    if let Some(max_age) = entry.cache_control.max_age {
        return max_age;
    }
    if let Some(expires) = entry.expires {
        if expires == 0 {
            return 0;
        }
        return ((expires - entry.response_date).max(0) as u64) / 1000;
    }
    if let Some(last_modified) = entry
        .last_modified
        .as_deref()
        .and_then(parse_http_date_ms)
    {
        if last_modified < entry.response_date {
            return ((entry.response_date - last_modified) as u64 / 1000) / 10;
        }
    }
    0
}

/// Classifies an entry at `now_ms` under the given overrides.
pub fn classify(entry: &CacheEntry, now_ms: i64, overrides: &CacheOverrides) -> Freshness {
    if entry.cache_control.no_cache {
        if overrides.ignore_no_cache {
            return Freshness::Fresh;
        }
        return Freshness::NoCache;
    }

    let lifetime = freshness_lifetime_secs(entry);
    let age = current_age_secs(entry, now_ms);
    if lifetime > age {
        return Freshness::Fresh;
    }
    if entry.cache_control.must_revalidate {
        return Freshness::MustRevalidate;
    }

    let staleness = age - lifetime;
    if let Some(window) = entry.cache_control.stale_while_revalidate {
        if staleness <= window {
            return Freshness::StaleWhileRevalidate;
        }
    }
    if let Some(window) = entry.cache_control.stale_if_error {
        if staleness <= window {
            return Freshness::StaleIfError;
        }
    }
    Freshness::Stale
}

/// TTL in seconds to hand the cache store on write-back.
///
/// The entry must outlive its freshness lifetime by the larger stale
/// tolerance window so stale-serving paths can still find it. When the
/// response carried no explicit lifetime at all, `default_ttl` applies.
/// The result is clamped by the override bounds.
pub fn store_ttl_secs(entry: &CacheEntry, default_ttl: Duration, overrides: &CacheOverrides) -> i64 {
    let lifetime = freshness_lifetime_secs(entry);
    let tolerance = entry
        .cache_control
        .stale_while_revalidate
        .unwrap_or(0)
        .max(entry.cache_control.stale_if_error.unwrap_or(0));

    let mut ttl = if entry.cache_control.max_age.is_none() && lifetime == 0 {
        default_ttl.as_secs()
    } else {
        lifetime.saturating_add(tolerance)
    };

    if let Some(minimum) = overrides.minimum_ttl {
        ttl = ttl.max(minimum);
    }
    if let Some(maximum) = overrides.maximum_ttl {
        ttl = ttl.min(maximum);
    }
    i64::try_from(ttl).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directives::CacheDirectives;
    use crate::payload::Payload;
    use http::HeaderMap;

    fn entry_with(directives: CacheDirectives, stored_at: i64) -> CacheEntry {
        let mut entry = CacheEntry::from_response(Payload::Empty, &HeaderMap::new(), 200, stored_at);
        entry.cache_control = directives;
        entry
    }

    fn max_age(seconds: u64) -> CacheDirectives {
        CacheDirectives {
            max_age: Some(seconds),
            ..CacheDirectives::default()
        }
    }

    #[test]
    fn fresh_strictly_while_age_below_max_age() {
        let entry = entry_with(max_age(10), 0);
        let overrides = CacheOverrides::default();
        assert_eq!(classify(&entry, 9_999, &overrides), Freshness::Fresh);
        assert_eq!(classify(&entry, 10_000, &overrides), Freshness::Stale);
        assert_eq!(classify(&entry, 60_000, &overrides), Freshness::Stale);
    }

    #[test]
    fn corrected_initial_age_uses_age_header() {
        let mut entry = entry_with(max_age(10), 0);
        entry.age_header = 8;
        // Resident for 3s on top of 8s initial age: 11s > 10s lifetime.
        assert_eq!(current_age_secs(&entry, 3_000), 11);
        assert_eq!(
            classify(&entry, 3_000, &CacheOverrides::default()),
            Freshness::Stale
        );
    }

    #[test]
    fn apparent_age_from_transit_delay() {
        let mut entry = entry_with(max_age(60), 5_000);
        entry.response_date = 1_000;
        // 4s apparent age + 2s resident = 6s.
        assert_eq!(current_age_secs(&entry, 7_000), 6);
    }

    #[test]
    fn expires_lifetime_relative_to_response_date() {
        let mut entry = entry_with(CacheDirectives::default(), 1_000);
        entry.response_date = 1_000;
        entry.expires = Some(31_000);
        assert_eq!(freshness_lifetime_secs(&entry), 30);
    }

    #[test]
    fn expires_zero_means_zero_lifetime() {
        let mut entry = entry_with(CacheDirectives::default(), 1_000);
        entry.expires = Some(0);
        assert_eq!(freshness_lifetime_secs(&entry), 0);
    }

    #[test]
    fn expires_in_the_past_clamps_to_zero() {
        let mut entry = entry_with(CacheDirectives::default(), 50_000);
        entry.response_date = 50_000;
        entry.expires = Some(10_000);
        assert_eq!(freshness_lifetime_secs(&entry), 0);
    }

    #[test]
    fn last_modified_heuristic_is_ten_percent() {
        let mut entry = entry_with(CacheDirectives::default(), 784_111_777_000);
        entry.response_date = 784_111_777_000;
        // 1000 seconds before the response date.
        entry.last_modified = Some("Sun, 06 Nov 1994 08:32:57 GMT".to_owned());
        assert_eq!(freshness_lifetime_secs(&entry), 100);
    }

    #[test]
    fn max_age_beats_expires() {
        let mut entry = entry_with(max_age(5), 0);
        entry.expires = Some(3_600_000);
        assert_eq!(freshness_lifetime_secs(&entry), 5);
    }

    #[test]
    fn no_cache_classifies_first() {
        let directives = CacheDirectives {
            no_cache: true,
            max_age: Some(3_600),
            ..CacheDirectives::default()
        };
        let entry = entry_with(directives, 0);
        assert_eq!(
            classify(&entry, 1, &CacheOverrides::default()),
            Freshness::NoCache
        );
        let ignore = CacheOverrides {
            ignore_no_cache: true,
            ..CacheOverrides::default()
        };
        assert_eq!(classify(&entry, 1, &ignore), Freshness::Fresh);
    }

    #[test]
    fn must_revalidate_beats_stale_windows() {
        let directives = CacheDirectives {
            max_age: Some(1),
            must_revalidate: true,
            stale_while_revalidate: Some(600),
            ..CacheDirectives::default()
        };
        let entry = entry_with(directives, 0);
        assert_eq!(
            classify(&entry, 5_000, &CacheOverrides::default()),
            Freshness::MustRevalidate
        );
    }

    #[test]
    fn stale_windows_in_order() {
        let directives = CacheDirectives {
            max_age: Some(1),
            stale_while_revalidate: Some(10),
            stale_if_error: Some(100),
            ..CacheDirectives::default()
        };
        let entry = entry_with(directives, 0);
        let overrides = CacheOverrides::default();
        // staleness 4s: inside SWR.
        assert_eq!(classify(&entry, 5_000, &overrides), Freshness::StaleWhileRevalidate);
        // staleness 50s: past SWR, inside SIE.
        assert_eq!(classify(&entry, 51_000, &overrides), Freshness::StaleIfError);
        // staleness 200s: past both.
        assert_eq!(classify(&entry, 201_000, &overrides), Freshness::Stale);
    }

    #[test]
    fn store_ttl_covers_stale_windows() {
        let directives = CacheDirectives {
            max_age: Some(60),
            stale_while_revalidate: Some(120),
            stale_if_error: Some(300),
            ..CacheDirectives::default()
        };
        let entry = entry_with(directives, 0);
        let ttl = store_ttl_secs(&entry, Duration::from_secs(900), &CacheOverrides::default());
        assert_eq!(ttl, 360);
    }

    #[test]
    fn store_ttl_falls_back_to_default_without_lifetime() {
        let entry = entry_with(CacheDirectives::default(), 0);
        let ttl = store_ttl_secs(&entry, Duration::from_secs(900), &CacheOverrides::default());
        assert_eq!(ttl, 900);
    }

    #[test]
    fn explicit_zero_max_age_does_not_use_default() {
        let entry = entry_with(max_age(0), 0);
        let ttl = store_ttl_secs(&entry, Duration::from_secs(900), &CacheOverrides::default());
        assert_eq!(ttl, 0);
    }

    #[test]
    fn ttl_clamping() {
        let entry = entry_with(max_age(60), 0);
        let clamped_up = CacheOverrides {
            minimum_ttl: Some(600),
            ..CacheOverrides::default()
        };
        assert_eq!(store_ttl_secs(&entry, Duration::ZERO, &clamped_up), 600);
        let clamped_down = CacheOverrides {
            maximum_ttl: Some(30),
            ..CacheOverrides::default()
        };
        assert_eq!(store_ttl_secs(&entry, Duration::ZERO, &clamped_down), 30);
    }

    #[test]
    fn override_merge_prefers_request_values() {
        let defaults = CacheOverrides {
            ignore_no_store: true,
            minimum_ttl: Some(10),
            maximum_ttl: Some(100),
            ..CacheOverrides::default()
        };
        let request = CacheOverrides {
            maximum_ttl: Some(50),
            ignore_no_cache: true,
            ..CacheOverrides::default()
        };
        let merged = defaults.merged_with(&request);
        assert!(merged.ignore_no_store);
        assert!(merged.ignore_no_cache);
        assert_eq!(merged.minimum_ttl, Some(10));
        assert_eq!(merged.maximum_ttl, Some(50));
    }
}
