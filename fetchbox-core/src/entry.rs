//! The cache envelope: a stored value plus the HTTP metadata the freshness
//! engine needs.
//!
//! Envelopes are always stored whole and round-trip through the cache store
//! as JSON bytes. A `kind` discriminant marks envelopes so legacy raw
//! values already present in a store are distinguishable via the
//! [`CacheEntry::decode`] type guard.

use std::collections::HashMap;

use http::HeaderMap;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::directives::CacheDirectives;
use crate::payload::Payload;
use crate::time::{parse_expires_ms, parse_http_date_ms};
use crate::vary;

/// Discriminant value stored in every envelope's `kind` field.
pub const ENVELOPE_KIND: &str = "fetchbox.entry.v1";

/// A cached response envelope.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    kind: SmolStr,
    /// Post-transform response body.
    pub value: Payload,
    /// Parsed `Cache-Control` directives.
    pub cache_control: CacheDirectives,
    /// Response `ETag`, verbatim.
    pub etag: Option<String>,
    /// Response `Last-Modified`, verbatim (re-parsed by the freshness engine).
    pub last_modified: Option<String>,
    /// Response `Date` in epoch ms, falling back to `stored_at`.
    pub response_date: i64,
    /// When the entry entered the cache, epoch ms. Monotonic per entry.
    pub stored_at: i64,
    /// Response `Age` at receipt, seconds.
    pub age_header: u64,
    /// Parsed `Expires` in epoch ms; `Some(0)` denotes already-expired.
    pub expires: Option<i64>,
    /// Original status code; 304 refreshes keep the original.
    pub status_code: u16,
    /// Raw `Vary` header.
    pub vary_headers: Option<String>,
    /// Request-header values captured for the fields listed in `Vary`,
    /// keyed by lowercased header name. `None` records a listed header that
    /// was absent on the stored request.
    pub vary_values: HashMap<String, Option<String>>,
}

impl CacheEntry {
    /// Builds an envelope from a response.
    ///
    /// `now_ms` becomes `stored_at`; `response_date` comes from the `Date`
    /// header when parseable and falls back to `stored_at`.
    pub fn from_response(
        value: Payload,
        response_headers: &HeaderMap,
        status_code: u16,
        now_ms: i64,
    ) -> Self {
        let cache_control = CacheDirectives::parse_opt(header_str(response_headers, "cache-control"));
        let response_date = header_str(response_headers, "date")
            .and_then(parse_http_date_ms)
            .unwrap_or(now_ms);
        let age_header = header_str(response_headers, "age")
            .and_then(|age| age.trim().parse::<u64>().ok())
            .unwrap_or(0);
        let expires = header_str(response_headers, "expires").map(parse_expires_ms);

        CacheEntry {
            kind: SmolStr::new_static(ENVELOPE_KIND),
            value,
            cache_control,
            etag: header_str(response_headers, "etag").map(str::to_owned),
            last_modified: header_str(response_headers, "last-modified").map(str::to_owned),
            response_date,
            stored_at: now_ms,
            age_header,
            expires,
            status_code,
            vary_headers: header_str(response_headers, "vary").map(str::to_owned),
            vary_values: HashMap::new(),
        }
    }

    /// Captures the request-header values named by this entry's `Vary`
    /// header. Called at write-back time with the merged request headers.
    pub fn capture_vary(&mut self, request_headers: &HeaderMap) {
        self.vary_values = vary::capture_vary_values(self.vary_headers.as_deref(), request_headers);
    }

    /// Refreshes metadata from a 304 response.
    ///
    /// The value and status code are always preserved. Every other metadata
    /// field is overwritten only when the 304 carried it; `stored_at` is set
    /// to `now_ms` and `response_date` to the 304's `Date` (else `now_ms`).
    pub fn refresh_from_304(&self, response_headers: &HeaderMap, now_ms: i64) -> Self {
        let mut refreshed = self.clone();
        refreshed.stored_at = now_ms;
        refreshed.response_date = header_str(response_headers, "date")
            .and_then(parse_http_date_ms)
            .unwrap_or(now_ms);

        if let Some(cache_control) = header_str(response_headers, "cache-control") {
            refreshed.cache_control = CacheDirectives::parse(cache_control);
        }
        if let Some(etag) = header_str(response_headers, "etag") {
            refreshed.etag = Some(etag.to_owned());
        }
        if let Some(last_modified) = header_str(response_headers, "last-modified") {
            refreshed.last_modified = Some(last_modified.to_owned());
        }
        if let Some(age) = header_str(response_headers, "age") {
            refreshed.age_header = age.trim().parse::<u64>().unwrap_or(0);
        }
        if let Some(expires) = header_str(response_headers, "expires") {
            refreshed.expires = Some(parse_expires_ms(expires));
        }
        if let Some(vary_headers) = header_str(response_headers, "vary") {
            refreshed.vary_headers = Some(vary_headers.to_owned());
        }
        refreshed
    }

    /// Serializes the envelope to store bytes.
    pub fn encode(&self) -> bytes::Bytes {
        // CacheEntry contains no map keys or values that can fail to
        // serialize as JSON.
        bytes::Bytes::from(serde_json::to_vec(self).unwrap_or_default())
    }

    /// Type guard and decoder: returns `None` for bytes that are not a
    /// fetchbox envelope (legacy raw values, foreign writers).
    pub fn decode(bytes: &[u8]) -> Option<Self> {
        let entry: CacheEntry = serde_json::from_slice(bytes).ok()?;
        if entry.kind == ENVELOPE_KIND {
            Some(entry)
        } else {
            None
        }
    }

    /// Whether this entry carries conditional validators.
    pub fn has_validators(&self) -> bool {
        self.etag.is_some() || self.last_modified.is_some()
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Option<&'h str> {
    headers.get(name).and_then(|value| value.to_str().ok())
}
