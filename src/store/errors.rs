//! Store error types

use thiserror::Error;

/// Failures reported by the storage layer
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("Table not found: {0}")]
    TableNotFound(String),

    #[error("Scan session failed: {0}")]
    SessionFailed(String),

    #[error("Invalid scan request: {0}")]
    InvalidRequest(String),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
