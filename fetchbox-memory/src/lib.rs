#![warn(missing_docs)]
//! # fetchbox-memory
//!
//! In-process store adapters for the fetchbox HTTP client middleware:
//!
//! - [`MemoryCacheStore`]: moka-backed response cache honoring the
//!   three-valued TTL contract
//! - [`MemoryDedupeStore`]: single-flight coordination with broadcast
//!   hand-off to joined callers
//! - [`MemoryRateStore`]: sliding-window admission with per-resource
//!   overrides and an optional adaptive priority-aware mode
//!
//! These adapters are suitable for single-process deployments and tests;
//! multi-process coordination needs external store implementations behind
//! the same `fetchbox-store` traits.

/// Moka-backed cache store.
pub mod cache;
/// Broadcast-based dedupe store.
pub mod dedupe;
/// Sliding-window rate-limit store.
pub mod rate;

pub use cache::MemoryCacheStore;
pub use dedupe::MemoryDedupeStore;
pub use rate::{MemoryRateStore, RateLimitConfig, ResourceLimits};
