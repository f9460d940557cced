//! Error types for client operations.
//!
//! The taxonomy separates caller cancellation, HTTP-level failures,
//! transport failures, and governor refusals so callers can react to each
//! without string matching. Custom error handlers are consulted for HTTP
//! failures only; the toolkit owns network-layer errors.

use fetchbox_core::Payload;
use fetchbox_store::StoreError;
use http::HeaderMap;
use thiserror::Error;

/// Context handed to a configured error handler for a non-2xx response.
#[derive(Clone, Debug)]
pub struct HttpFailure {
    /// The requested URL.
    pub url: String,
    /// Response status code.
    pub status: u16,
    /// Parsed response body.
    pub data: Payload,
    /// Response headers.
    pub headers: HeaderMap,
}

impl HttpFailure {
    /// A short message extracted from the body, when the body carries one.
    pub fn body_message(&self) -> Option<String> {
        match &self.data {
            Payload::Json(value) => value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_owned),
            Payload::Text(text) if !text.is_empty() => Some(text.clone()),
            _ => None,
        }
    }
}

/// Error type for client operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The caller cancelled via the abort signal. Never wrapped, never
    /// passed to custom handlers.
    #[error("request aborted")]
    Aborted,

    /// The caller passed a URL that does not parse.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// A response arrived with a non-2xx status.
    #[error("http status {status}: {message}")]
    Http {
        /// Response status code.
        status: u16,
        /// Human-readable summary, from the body when available.
        message: String,
        /// Parsed response body.
        data: Option<Payload>,
        /// Response headers.
        headers: Box<HeaderMap>,
    },

    /// The transport failed before a response arrived (DNS, connect,
    /// socket, TLS).
    #[error("network error: {0}")]
    Network(String),

    /// The governor refused and `throw_on_rate_limit` is set.
    #[error("rate limited on `{resource}`: retry in {wait_ms} ms")]
    RateLimited {
        /// Resource or origin that is limited.
        resource: String,
        /// Milliseconds until the limit is expected to lift.
        wait_ms: u64,
    },

    /// Cumulative cooldown and admission waits exceeded the wait budget.
    #[error("rate-limit wait budget exhausted after {waited_ms} ms")]
    BudgetExhausted {
        /// Milliseconds waited before giving up.
        waited_ms: u64,
    },

    /// The response body could not be decoded into the requested type.
    #[error("failed to decode response body: {0}")]
    Serialization(String),

    /// A cache, dedupe, or rate-limit store failed. Infrastructure
    /// failures propagate; the pipeline never retries them.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A coalesced request's owner failed; joiners do not re-fetch.
    #[error("coalesced upstream request failed")]
    UpstreamFailed,
}

impl Error {
    /// Default construction of an HTTP error from a failure context, used
    /// when no custom error handler is configured.
    pub(crate) fn from_failure(failure: &HttpFailure) -> Self {
        let message = failure
            .body_message()
            .unwrap_or_else(|| format!("request to {} failed", failure.url));
        Error::Http {
            status: failure.status,
            message,
            data: Some(failure.data.clone()),
            headers: Box::new(failure.headers.clone()),
        }
    }

    /// Whether this error may be served from a stale-if-error window:
    /// server errors and network failures only.
    pub(crate) fn is_stale_if_error_eligible(&self) -> bool {
        match self {
            Error::Http { status, .. } => *status >= 500,
            Error::Network(_) => true,
            _ => false,
        }
    }

    /// Status code, for retry predicates and callers.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}
