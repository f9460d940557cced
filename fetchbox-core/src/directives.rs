//! `Cache-Control` directive parsing.
//!
//! The parser is deliberately lenient: directives are case-insensitive,
//! unknown directives are ignored, and malformed numeric values leave the
//! field absent rather than zero. An empty or missing header parses to the
//! zeroed record.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Parsed `Cache-Control` directives relevant to a private cache.
///
/// `s_max_age` is parsed but never consulted by the freshness engine; it is
/// a shared-cache directive.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheDirectives {
    /// `no-cache`: revalidate before serving.
    pub no_cache: bool,
    /// `no-store`: do not write the response to cache.
    pub no_store: bool,
    /// `must-revalidate`: no stale tolerance once expired.
    pub must_revalidate: bool,
    /// `proxy-revalidate`: shared-cache analogue of `must-revalidate`.
    pub proxy_revalidate: bool,
    /// `public`.
    pub public: bool,
    /// `private`.
    pub private: bool,
    /// `immutable`.
    pub immutable: bool,
    /// `max-age=N`, seconds.
    pub max_age: Option<u64>,
    /// `s-maxage=N`, seconds.
    pub s_max_age: Option<u64>,
    /// `stale-while-revalidate=N`, seconds.
    pub stale_while_revalidate: Option<u64>,
    /// `stale-if-error=N`, seconds.
    pub stale_if_error: Option<u64>,
}

impl CacheDirectives {
    /// Parses a `Cache-Control` header value.
    pub fn parse(value: &str) -> Self {
        let mut directives = CacheDirectives::default();
        for token in value.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let (name, argument) = match token.split_once('=') {
                Some((name, argument)) => (name.trim(), Some(argument.trim())),
                None => (token, None),
            };
            match name.to_ascii_lowercase().as_str() {
                "no-cache" => directives.no_cache = true,
                "no-store" => directives.no_store = true,
                "must-revalidate" => directives.must_revalidate = true,
                "proxy-revalidate" => directives.proxy_revalidate = true,
                "public" => directives.public = true,
                "private" => directives.private = true,
                "immutable" => directives.immutable = true,
                "max-age" => directives.max_age = parse_seconds(argument),
                "s-maxage" => directives.s_max_age = parse_seconds(argument),
                "stale-while-revalidate" => {
                    directives.stale_while_revalidate = parse_seconds(argument)
                }
                "stale-if-error" => directives.stale_if_error = parse_seconds(argument),
                _ => {}
            }
        }
        directives
    }

    /// Parses an optional header value, yielding the zeroed record when the
    /// header is absent.
    pub fn parse_opt(value: Option<&str>) -> Self {
        value.map(Self::parse).unwrap_or_default()
    }
}

fn parse_seconds(argument: Option<&str>) -> Option<u64> {
    let argument = argument?.trim_matches('"');
    argument.parse::<u64>().ok()
}

impl fmt::Display for CacheDirectives {
    /// Canonical serialization: boolean directives first in a fixed order,
    /// then numeric directives. Parsing the output reproduces the record.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut emit = |f: &mut fmt::Formatter<'_>, token: &str| -> fmt::Result {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            f.write_str(token)
        };
        if self.no_cache {
            emit(f, "no-cache")?;
        }
        if self.no_store {
            emit(f, "no-store")?;
        }
        if self.must_revalidate {
            emit(f, "must-revalidate")?;
        }
        if self.proxy_revalidate {
            emit(f, "proxy-revalidate")?;
        }
        if self.public {
            emit(f, "public")?;
        }
        if self.private {
            emit(f, "private")?;
        }
        if self.immutable {
            emit(f, "immutable")?;
        }
        if let Some(seconds) = self.max_age {
            emit(f, &format!("max-age={seconds}"))?;
        }
        if let Some(seconds) = self.s_max_age {
            emit(f, &format!("s-maxage={seconds}"))?;
        }
        if let Some(seconds) = self.stale_while_revalidate {
            emit(f, &format!("stale-while-revalidate={seconds}"))?;
        }
        if let Some(seconds) = self.stale_if_error {
            emit(f, &format!("stale-if-error={seconds}"))?;
        }
        Ok(())
    }
}
