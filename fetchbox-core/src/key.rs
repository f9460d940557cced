//! Request fingerprinting and resource inference.
//!
//! A [`Fingerprint`] is the stable identity of a GET request: a SHA-256
//! digest over the request origin, path, and normalized query parameters.
//! It is the key for both the cache store and the dedupe store, so two
//! requests that would observably return the same response must fingerprint
//! identically, and requests that can differ must not collide.
//!
//! ## Normalization rules
//!
//! - Query key order never matters: `?a=1&b=2` and `?b=2&a=1` collide.
//! - Primitive parameter values are compared by their string form, so the
//!   integer `10` and the string `"10"` collide as intended.
//! - Omitted parameters contribute nothing; null parameters are preserved
//!   as key-only pairs (`?flag`), which is distinct from `?flag=`.
//! - Repeated keys form an ordered sequence: `tag=a&tag=b` differs from
//!   `tag=b&tag=a`, from `tag=b`, and from `tag=a&tag=b&tag=c`.
//! - Different origins with the same path and query always differ.

use std::borrow::Cow;
use std::fmt;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use smol_str::SmolStr;
use url::Url;

/// Stable 256-bit request identity, hex encoded.
///
/// Cheap to clone and usable as a map key in cache, dedupe, and rate-limit
/// stores. The inner representation is opaque to stores.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(SmolStr);

impl Fingerprint {
    /// Wraps an already-computed digest. Intended for stores and tests.
    pub fn from_digest(digest: impl Into<SmolStr>) -> Self {
        Fingerprint(digest.into())
    }

    /// The hex digest as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A primitive query parameter value.
///
/// Values are coerced to their canonical string form before hashing and
/// before serialization into a request URL, so `ParamValue::Int(10)` and
/// `ParamValue::Str("10".into())` are the same parameter.
#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    /// A string value, used verbatim.
    Str(String),
    /// An integer, rendered in decimal.
    Int(i64),
    /// A float, rendered with Rust's shortest round-trip formatting.
    Float(f64),
    /// A boolean, rendered as `true`/`false`.
    Bool(bool),
    /// An explicit null: the key is preserved without a value.
    Null,
}

impl ParamValue {
    /// Canonical string form, or `None` for [`ParamValue::Null`].
    pub fn canonical(&self) -> Option<String> {
        match self {
            ParamValue::Str(s) => Some(s.clone()),
            ParamValue::Int(i) => Some(i.to_string()),
            ParamValue::Float(f) => Some(f.to_string()),
            ParamValue::Bool(b) => Some(b.to_string()),
            ParamValue::Null => None,
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(value: f64) -> Self {
        ParamValue::Float(value)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// Computes the fingerprint of a request.
///
/// `params` are programmatic parameters merged with the URL's own query
/// string; the URL query contributes pairs in document order. Null values
/// survive as key-only pairs; callers express "omitted" by not passing the
/// parameter at all.
pub fn fingerprint(url: &Url, params: &[(String, ParamValue)]) -> Fingerprint {
    let mut pairs: Vec<(Cow<'_, str>, Option<Cow<'_, str>>)> = Vec::new();

    if let Some(query) = url.query() {
        for (key, value) in parse_query_pairs(query) {
            pairs.push((key, value));
        }
    }
    for (key, value) in params {
        pairs.push((Cow::Borrowed(key.as_str()), value.canonical().map(Cow::Owned)));
    }

    // Stable sort: key order stops mattering, the relative order of values
    // under a repeated key is preserved.
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    hasher.update(origin_of(url).as_bytes());
    hasher.update(b"\n");
    hasher.update(url.path().as_bytes());
    hasher.update(b"\n");
    for (key, value) in &pairs {
        hasher.update(key.as_bytes());
        match value {
            Some(value) => {
                hasher.update(b"=");
                hasher.update(value.as_bytes());
            }
            None => hasher.update(b"\x00"),
        }
        hasher.update(b"&");
    }

    Fingerprint(SmolStr::new(hex::encode(hasher.finalize())))
}

/// The origin (`scheme://host:port`) of a URL, with the default port made
/// explicit so `https://a` and `https://a:443` agree.
pub fn origin_of(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default();
    match url.port_or_known_default() {
        Some(port) => format!("{}://{}:{}", url.scheme(), host, port),
        None => format!("{}://{}", url.scheme(), host),
    }
}

/// Infers the rate-limit resource name from a URL string.
///
/// Returns the last nonempty path segment, or `unknown` when the URL does
/// not parse or the path is empty. Multi-segment naming is left to
/// per-resource configuration in the rate store.
pub fn infer_resource(url: &str) -> SmolStr {
    let parsed = match Url::parse(url) {
        Ok(parsed) => parsed,
        Err(_) => return SmolStr::new_static("unknown"),
    };
    let segment = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last());
    match segment {
        Some(segment) => SmolStr::new(segment),
        None => SmolStr::new_static("unknown"),
    }
}

/// Splits a raw query string into decoded pairs, distinguishing a key with
/// no `=` (a preserved null) from a key with an empty value.
fn parse_query_pairs(query: &str) -> impl Iterator<Item = (Cow<'_, str>, Option<Cow<'_, str>>)> {
    query.split('&').filter(|part| !part.is_empty()).map(|part| {
        match part.split_once('=') {
            Some((key, value)) => (decode_component(key), Some(decode_component(value))),
            None => (decode_component(part), None),
        }
    })
}

fn decode_component(raw: &str) -> Cow<'_, str> {
    if raw.contains('+') {
        let spaced = raw.replace('+', " ");
        Cow::Owned(percent_decode_str(&spaced).decode_utf8_lossy().into_owned())
    } else {
        percent_decode_str(raw).decode_utf8_lossy()
    }
}
