//! The transport seam.
//!
//! The client is transport-agnostic: anything that can perform a single
//! GET exchange plugs in behind [`Transport`]. Pre-request and
//! post-response interceptors run on every attempt, including background
//! revalidations.

use std::sync::Arc;

use async_trait::async_trait;
use http::{HeaderMap, StatusCode};
use thiserror::Error;
use url::Url;

use crate::signal::AbortSignal;

/// A single outbound GET exchange.
#[derive(Clone, Debug)]
pub struct TransportRequest {
    /// Fully resolved request URL, query included.
    pub url: Url,
    /// Merged request headers.
    pub headers: HeaderMap,
    /// Cancellation signal covering the exchange.
    pub signal: Option<AbortSignal>,
}

/// The transport's view of a response: status, headers, and the body read
/// once into memory.
#[derive(Clone, Debug)]
pub struct TransportResponse {
    /// Response status.
    pub status: StatusCode,
    /// Response headers; lookups are case-insensitive.
    pub headers: HeaderMap,
    /// The complete body as text.
    pub body: String,
}

impl TransportResponse {
    /// Whether the status is in the 2xx range.
    pub fn is_ok(&self) -> bool {
        self.status.is_success()
    }

    /// The `Content-Type` header, if present.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
    }
}

/// Failures below the HTTP layer.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The exchange was cancelled via the request's abort signal.
    #[error("request aborted")]
    Aborted,
    /// DNS, connect, socket, TLS, or body-read failure.
    #[error("{0}")]
    Network(String),
}

/// The lowest-level HTTP exchange, swapped via the client builder.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Performs one GET exchange.
    async fn fetch(&self, request: TransportRequest) -> Result<TransportResponse, TransportError>;
}

/// Hook run on every outgoing request before the transport sees it.
pub type RequestInterceptor = Arc<dyn Fn(&mut TransportRequest) + Send + Sync>;

/// Hook run on every response before the pipeline consumes it.
pub type ResponseInterceptor = Arc<dyn Fn(&TransportRequest, &mut TransportResponse) + Send + Sync>;
