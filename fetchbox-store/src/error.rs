//! Error types for store operations.

use thiserror::Error;

/// Error type for store operations.
///
/// Categorizes failures at the store boundary so the client can tell
/// infrastructure problems apart from data problems.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Internal store error, state or computation error.
    ///
    /// Any error not related to network interaction.
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),

    /// Network interaction error.
    ///
    /// Errors occurring during communication with remote stores.
    #[error(transparent)]
    Connection(Box<dyn std::error::Error + Send + Sync>),

    /// Serialization or deserialization error.
    #[error("store value codec failed: {0}")]
    Format(String),
}

impl StoreError {
    /// Wraps an arbitrary error as an internal store failure.
    pub fn internal<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Internal(Box::new(error))
    }

    /// Wraps an arbitrary error as a connection failure.
    pub fn connection<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Connection(Box::new(error))
    }
}

/// Result alias used throughout the store traits.
pub type StoreResult<T> = Result<T, StoreError>;
