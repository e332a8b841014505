//! Error types for persistence operations.

use std::path::PathBuf;
use thiserror::Error;

use prism_models::{TaskId, TaskStatus};

/// Errors raised by task stores.
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("failed to read task record {path}: {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write task record {path}: {source}")]
    WriteError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode task record: {0}")]
    SerializeError(#[from] serde_json::Error),

    #[error("failed to create state directory {path}: {source}")]
    DirectoryError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task already exists: {0}")]
    AlreadyExists(TaskId),

    /// Only Failed or Cancelled records can be reset.
    #[error("task {task_id} is {status}, not failed or cancelled")]
    NotRetryable { task_id: TaskId, status: TaskStatus },

    /// A stored record that cannot be decoded.
    #[error("invalid task record: {0}")]
    InvalidData(String),

    /// SQLite driver failure.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("store lock poisoned: {0}")]
    LockPoisoned(String),
}

impl PersistenceError {
    /// Returns true for a missing record.
    pub fn is_not_found(&self) -> bool {
        matches!(self, PersistenceError::NotFound(_))
    }
}

/// Result type alias for persistence operations.
pub type Result<T> = std::result::Result<T, PersistenceError>;
