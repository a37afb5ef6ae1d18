//! Error types for alert store operations

use std::fmt;

/// Result type alias for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in an alert store backend
#[derive(Debug)]
pub enum StoreError {
    /// Backend-specific failure (connection, query, ...)
    Backend(String),

    /// Alert serialization/deserialization error
    Serialization(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Backend(msg) => write!(f, "alert store backend error: {}", msg),
            StoreError::Serialization(msg) => {
                write!(f, "alert serialization error: {}", msg)
            }
        }
    }
}

impl std::error::Error for StoreError {}
