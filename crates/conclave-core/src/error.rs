//! Error types for Conclave Core.

use thiserror::Error;

use crate::collaboration::CollaborationError;
use crate::storage::StorageError;

/// Top-level error type for Conclave operations.
#[derive(Error, Debug)]
pub enum ConclaveError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Collaboration errors
    #[error("Collaboration error: {0}")]
    Collaboration(#[from] CollaborationError),
}

/// Result type alias for Conclave operations.
pub type Result<T> = std::result::Result<T, ConclaveError>;
