//! Store error types.

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Resource not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// An object with the same identity already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The object changed since it was read (optimistic concurrency control).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Version mismatch reported by a backend that knows both versions.
    #[error("version mismatch: expected {expected}, got {actual}")]
    VersionMismatch { expected: u64, actual: u64 },

    /// The request was rejected as malformed.
    #[error("invalid: {0}")]
    Invalid(String),

    /// The store could not be reached.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// The request did not complete in time.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Internal error.
    #[error("internal: {0}")]
    Internal(String),
}

impl StoreError {
    /// A write lost an optimistic-concurrency race. A fresh read will see
    /// the newer state.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_) | StoreError::VersionMismatch { .. }
        )
    }

    /// Worth retrying the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::Conflict(_)
                | StoreError::VersionMismatch { .. }
                | StoreError::Unavailable(_)
                | StoreError::Timeout(_)
        )
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
