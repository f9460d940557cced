#![warn(missing_docs)]
//! # fetchbox-reqwest
//!
//! [`Transport`] implementation backed by [`reqwest`].
//!
//! ```no_run
//! use fetchbox::Client;
//! use fetchbox_reqwest::ReqwestTransport;
//!
//! let client = Client::builder()
//!     .transport(ReqwestTransport::new())
//!     .build();
//! ```

use async_trait::async_trait;
use fetchbox::transport::{Transport, TransportError, TransportRequest, TransportResponse};

/// GET transport over a shared [`reqwest::Client`].
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Creates a transport with a default reqwest client.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing reqwest client (custom TLS, proxies, timeouts).
    pub fn with_client(client: reqwest::Client) -> Self {
        ReqwestTransport { client }
    }

    async fn exchange(
        &self,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let response = self
            .client
            .get(request.url.clone())
            .headers(request.headers.clone())
            .send()
            .await
            .map_err(|error| TransportError::Network(error.to_string()))?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .text()
            .await
            .map_err(|error| TransportError::Network(error.to_string()))?;

        Ok(TransportResponse {
            status,
            headers,
            body,
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        match request.signal.clone() {
            Some(signal) => {
                if signal.is_aborted() {
                    return Err(TransportError::Aborted);
                }
                tokio::select! {
                    _ = signal.aborted() => Err(TransportError::Aborted),
                    result = self.exchange(&request) => result,
                }
            }
            None => self.exchange(&request).await,
        }
    }
}
