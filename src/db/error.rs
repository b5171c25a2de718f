//! Store error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that can occur while opening or using the document store.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The database could not be opened (directory, permissions, schema).
    #[error("Failed to open database at {path:?}: {reason}")]
    Initialization { path: PathBuf, reason: String },

    /// An underlying read or write failed.
    #[error("Database error: {0}")]
    Persistence(#[from] sqlx::Error),

    /// The targeted document does not exist (or was deleted).
    #[error("Todo not found: {0}")]
    NotFound(String),

    /// Todo text was empty after trimming.
    #[error("Todo text cannot be empty")]
    EmptyText,

    /// A stored document could not be decoded.
    #[error("Malformed document '{id}': {reason}")]
    Malformed { id: String, reason: String },
}

impl StoreError {
    pub(crate) fn init(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        StoreError::Initialization {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
