#![warn(missing_docs)]
//! # fetchbox
//!
//! HTTP client middleware that layers three interacting subsystems around
//! outbound GET requests:
//!
//! - an **RFC 9111–aware response cache** with conditional revalidation,
//!   stale-while-revalidate, and stale-if-error tolerance windows;
//! - a **request coalescer**: single-flight deduplication where concurrent
//!   callers of the same request share one fetch;
//! - a **rate-limit governor** combining sliding-window admission,
//!   server-advertised cooldowns, and adaptive priority-aware capacity.
//!
//! The [`Client`] composes them into one pipeline: cache lookup →
//! freshness classification → conditional revalidation → dedupe ownership
//! → rate admission → fetch → post-processing → write-back. Each phase
//! elides itself when its store is absent, so a client with only a cache
//! store is just an HTTP cache, and a client with no stores at all is a
//! thin fetch wrapper with retries.
//!
//! ```no_run
//! use fetchbox::{Client, RequestOptions};
//! use fetchbox_memory::{MemoryCacheStore, MemoryDedupeStore};
//! # use fetchbox::transport::{Transport, TransportRequest, TransportResponse, TransportError};
//! # struct MyTransport;
//! # #[async_trait::async_trait]
//! # impl Transport for MyTransport {
//! #     async fn fetch(&self, _: TransportRequest) -> Result<TransportResponse, TransportError> {
//! #         unimplemented!()
//! #     }
//! # }
//!
//! # async fn example() -> Result<(), fetchbox::Error> {
//! let client = Client::builder()
//!     .transport(MyTransport)
//!     .cache_store(MemoryCacheStore::new(10_000))
//!     .dedupe_store(MemoryDedupeStore::new())
//!     .build();
//!
//! let user: serde_json::Value = client
//!     .get_json("https://api.example.com/users/1", RequestOptions::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

/// The client, its builder, and the request pipeline.
pub mod client;
/// Per-request options.
pub mod config;
/// Single-flight coordination over the dedupe store.
pub mod dedupe;
/// The client error taxonomy.
pub mod error;
/// The rate governor: cooldowns, server hints, and admission.
pub mod limit;
/// Retry policy for the fetch attempt.
pub mod retry;
/// Background revalidation bookkeeping.
pub mod revalidate;
/// Cooperative cancellation.
pub mod signal;
/// The transport seam and interceptor hooks.
pub mod transport;

pub use client::{
    Client, ClientBuilder, ErrorHandler, NotSet, ResponseHandler, ResponseTransformer,
};
pub use config::{RequestOptions, RetryOverride};
pub use error::{Error, HttpFailure};
pub use limit::RateLimitHeaders;
pub use retry::{Jitter, RetryPolicy};
pub use revalidate::RevalidationManager;
pub use signal::{abort_pair, AbortHandle, AbortSignal};
pub use transport::{Transport, TransportError, TransportRequest, TransportResponse};

pub use fetchbox_core::{CacheOverrides, ParamValue, Payload};
pub use fetchbox_store::Priority;

/// The fetchbox prelude.
///
/// ```rust
/// use fetchbox::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{Client, Error, Payload, Priority, RequestOptions};
}
