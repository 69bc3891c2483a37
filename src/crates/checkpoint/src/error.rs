//! Error types for review store operations

use thiserror::Error;

/// Result type for review store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during review store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// No record stored under the workflow id
    #[error("Workflow record not found: {0}")]
    NotFound(String),

    /// The record exists but is not in a state that allows the operation
    #[error("Conflict on workflow {id}: {reason}")]
    Conflict { id: String, reason: String },

    /// Invalid record or request
    #[error("Invalid record: {0}")]
    Invalid(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub(crate) fn conflict(id: impl Into<String>, reason: impl Into<String>) -> Self {
        StoreError::Conflict {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Whether this error means the workflow id is unknown.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Whether this error is a state conflict (already approved, already resumed, ...).
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}
