//! Storage error types.

use thiserror::Error;

/// Errors raised by a storage backend or the persistence layer on top of it.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backend cannot be used at all (disabled, locked, missing).
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// A write would exceed the backend's capacity.
    #[error("storage quota exceeded: needed {needed} bytes, capacity is {capacity} bytes")]
    QuotaExceeded { needed: usize, capacity: usize },
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse stored JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::QuotaExceeded { .. })
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;
