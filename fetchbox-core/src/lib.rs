#![warn(missing_docs)]
//! # fetchbox-core
//!
//! Core types and algorithms for the fetchbox HTTP client middleware.
//!
//! This crate is pure: no I/O, no clocks of its own (callers pass epoch-ms
//! timestamps), no store access. It provides the building blocks the client
//! crate composes into a request pipeline:
//!
//! - **Identity**: [`Fingerprint`] and the request fingerprinter ([`key`])
//! - **HTTP cache semantics**: [`CacheDirectives`], the [`freshness`]
//!   engine, the [`CacheEntry`] envelope, and [`vary`] matching
//! - **Payloads**: the typed [`Payload`] body model and parsing rules
//! - **Adaptive capacity**: [`ActivityMetrics`] and the stateless
//!   [`adaptive`] allocator used by priority-aware rate-limit stores

/// Per-resource activity sampling and trend detection.
pub mod activity;
/// The stateless adaptive capacity calculator.
pub mod adaptive;
/// `Cache-Control` parsing.
pub mod directives;
/// The stored cache envelope.
pub mod entry;
/// Freshness classification, age math, and store TTL computation.
pub mod freshness;
/// Request fingerprinting and resource inference.
pub mod key;
/// The typed response payload.
pub mod payload;
/// Epoch-ms helpers and HTTP-date parsing.
pub mod time;
/// `Vary` header capture and matching.
pub mod vary;

pub use activity::{detect_trend, ActivityMetrics, Trend};
pub use adaptive::{calculate, AdaptiveConfig, AdaptiveConfigError, CapacityAllocation};
pub use directives::CacheDirectives;
pub use entry::{CacheEntry, ENVELOPE_KIND};
pub use freshness::{
    classify, current_age_secs, freshness_lifetime_secs, store_ttl_secs, CacheOverrides, Freshness,
};
pub use key::{fingerprint, infer_resource, origin_of, Fingerprint, ParamValue};
pub use payload::{parse_body, Payload};
pub use time::now_ms;
