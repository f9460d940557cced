//! The typed response payload and body-parsing rules.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The post-transform response body carried through cache, dedupe, and the
/// caller-facing surface.
///
/// The tagged representation keeps `Text` and `Json` of a string value
/// distinguishable when an envelope round-trips through a store, and lets
/// `Json(Value::Null)` survive dedupe hand-off intact.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    /// A parsed JSON document.
    Json(Value),
    /// A raw text body.
    Text(String),
    /// No body: 204/205 responses and empty bodies.
    Empty,
}

impl Payload {
    /// Deserializes the payload into a concrete type.
    ///
    /// `Text` is re-parsed as JSON (it may be a body whose content type was
    /// missing); `Empty` deserializes from JSON `null`.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        match self {
            Payload::Json(value) => serde_json::from_value(value.clone()),
            Payload::Text(text) => serde_json::from_str(text),
            Payload::Empty => serde_json::from_value(Value::Null),
        }
    }

    /// The body as text, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The parsed JSON document, if any.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Whether this is [`Payload::Empty`].
    pub fn is_empty(&self) -> bool {
        matches!(self, Payload::Empty)
    }
}

/// Parses a response body per the content negotiation rules.
///
/// - 204/205 responses and empty bodies yield [`Payload::Empty`].
/// - JSON content types (`application/json`, `*+json`) and bodies whose
///   first non-whitespace byte is `{` or `[` are parsed as JSON, falling
///   back to text when parsing fails.
/// - Everything else is text.
pub fn parse_body(status: u16, content_type: Option<&str>, body: &str) -> Payload {
    if status == 204 || status == 205 || body.is_empty() {
        return Payload::Empty;
    }

    let declared_json = content_type
        .map(|ct| {
            let ct = ct.to_ascii_lowercase();
            ct.contains("application/json") || ct.contains("+json")
        })
        .unwrap_or(false);
    let looks_json = matches!(body.trim_start().as_bytes().first(), Some(b'{') | Some(b'['));

    if declared_json || looks_json {
        match serde_json::from_str(body) {
            Ok(value) => Payload::Json(value),
            Err(_) => Payload::Text(body.to_owned()),
        }
    } else {
        Payload::Text(body.to_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn no_content_statuses_are_empty() {
        assert_eq!(parse_body(204, Some("application/json"), "ignored"), Payload::Empty);
        assert_eq!(parse_body(205, None, "ignored"), Payload::Empty);
        assert_eq!(parse_body(200, None, ""), Payload::Empty);
    }

    #[test]
    fn json_content_type_parses_json() {
        let parsed = parse_body(200, Some("application/json; charset=utf-8"), r#"{"ok":true}"#);
        assert_eq!(parsed, Payload::Json(json!({"ok": true})));
    }

    #[test]
    fn json_suffix_content_type_parses_json() {
        let parsed = parse_body(200, Some("application/problem+json"), r#"{"title":"x"}"#);
        assert_eq!(parsed, Payload::Json(json!({"title": "x"})));
    }

    #[test]
    fn json_sniffing_without_content_type() {
        let parsed = parse_body(200, None, "  [1, 2, 3]");
        assert_eq!(parsed, Payload::Json(json!([1, 2, 3])));
    }

    #[test]
    fn malformed_json_falls_back_to_text() {
        let parsed = parse_body(200, Some("application/json"), "{not json");
        assert_eq!(parsed, Payload::Text("{not json".into()));
    }

    #[test]
    fn plain_text_stays_text() {
        let parsed = parse_body(200, Some("text/plain"), "hello");
        assert_eq!(parsed, Payload::Text("hello".into()));
    }

    #[test]
    fn null_survives_a_serde_round_trip() {
        let payload = Payload::Json(Value::Null);
        let encoded = serde_json::to_string(&payload).unwrap();
        let decoded: Payload = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, payload);
        assert_ne!(decoded, Payload::Empty);
    }

    #[test]
    fn typed_accessor_deserializes() {
        #[derive(serde::Deserialize, PartialEq, Debug)]
        struct Item {
            id: u32,
        }
        let payload = parse_body(200, Some("application/json"), r#"{"id": 7}"#);
        assert_eq!(payload.json::<Item>().unwrap(), Item { id: 7 });
    }
}
