//! `Vary` header matching.
//!
//! When a response names request headers in `Vary`, the cached entry is only
//! valid for requests whose values for those headers agree with the values
//! captured at store time. `Vary: *` marks the entry as never matching.

use std::collections::HashMap;

use http::HeaderMap;

/// Parses a `Vary` header into lowercased field names.
pub fn parse_vary(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|field| field.trim().to_ascii_lowercase())
        .filter(|field| !field.is_empty())
        .collect()
}

/// Captures the request-header values for every field listed in `Vary`.
///
/// Fields listed but absent from the request are recorded as `None`, so a
/// later request that also lacks the header still matches.
pub fn capture_vary_values(
    vary: Option<&str>,
    request_headers: &HeaderMap,
) -> HashMap<String, Option<String>> {
    let mut captured = HashMap::new();
    let Some(vary) = vary else {
        return captured;
    };
    for field in parse_vary(vary) {
        if field == "*" {
            continue;
        }
        let value = request_headers
            .get(field.as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::to_owned);
        captured.insert(field, value);
    }
    captured
}

/// Checks whether a stored entry's captured values agree with the current
/// request. An absent `Vary` always matches; `Vary: *` never matches.
pub fn vary_matches(
    vary: Option<&str>,
    captured: &HashMap<String, Option<String>>,
    request_headers: &HeaderMap,
) -> bool {
    let Some(vary) = vary else {
        return true;
    };
    let fields = parse_vary(vary);
    if fields.iter().any(|field| field == "*") {
        return false;
    }
    fields.iter().all(|field| {
        let current = request_headers
            .get(field.as_str())
            .and_then(|value| value.to_str().ok());
        let stored = captured.get(field).and_then(|value| value.as_deref());
        current == stored
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::header::{HeaderName, HeaderValue};

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(
                name.parse::<HeaderName>().unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn star_never_matches() {
        let captured = capture_vary_values(Some("*"), &headers(&[]));
        assert!(!vary_matches(Some("*"), &captured, &headers(&[])));
    }

    #[test]
    fn absent_vary_always_matches() {
        assert!(vary_matches(None, &HashMap::new(), &headers(&[("accept", "text/html")])));
    }

    #[test]
    fn matching_value_matches() {
        let request = headers(&[("accept", "application/json")]);
        let captured = capture_vary_values(Some("Accept"), &request);
        assert!(vary_matches(Some("Accept"), &captured, &request));
    }

    #[test]
    fn differing_value_misses() {
        let stored = headers(&[("accept", "application/json")]);
        let captured = capture_vary_values(Some("Accept"), &stored);
        let request = headers(&[("accept", "text/html")]);
        assert!(!vary_matches(Some("Accept"), &captured, &request));
    }

    #[test]
    fn both_absent_is_a_match() {
        let captured = capture_vary_values(Some("Accept-Language"), &headers(&[]));
        assert_eq!(captured.get("accept-language"), Some(&None));
        assert!(vary_matches(Some("Accept-Language"), &captured, &headers(&[])));
    }

    #[test]
    fn absent_versus_present_misses() {
        let captured = capture_vary_values(Some("Accept"), &headers(&[]));
        let request = headers(&[("accept", "text/html")]);
        assert!(!vary_matches(Some("Accept"), &captured, &request));
    }

    #[test]
    fn header_name_lookup_is_case_insensitive() {
        let request = headers(&[("accept", "application/json")]);
        let captured = capture_vary_values(Some("ACCEPT"), &request);
        assert!(vary_matches(Some("accept"), &captured, &request));
    }

    #[test]
    fn every_listed_field_must_agree() {
        let stored = headers(&[("accept", "application/json"), ("accept-language", "en")]);
        let captured = capture_vary_values(Some("Accept, Accept-Language"), &stored);
        let request = headers(&[("accept", "application/json"), ("accept-language", "de")]);
        assert!(!vary_matches(Some("Accept, Accept-Language"), &captured, &request));
    }
}
