//! Error types for workspace persistence.

use thiserror::Error;

/// Errors raised by a [`WorkspaceStore`](crate::storage::WorkspaceStore).
#[derive(Error, Debug)]
pub enum StorageError {
    /// SQLite rejected a statement or the connection failed.
    #[error("SQLite error: {0}")]
    Connection(#[from] rusqlite::Error),

    /// No workspace is stored under the given ID.
    #[error("Workspace not found in store: {0}")]
    NotFound(String),

    /// A JSON column could not be encoded or decoded.
    #[error("Failed to encode workspace column: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A stored row holds a value the model cannot represent.
    #[error("Invalid stored data: {0}")]
    InvalidData(String),

    /// The database file or its directory could not be prepared.
    #[error("Database file error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Returns whether this error reports a missing workspace.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
