//! Error types for the lock crate.

use prism_models::{ResourceId, TaskId};
use thiserror::Error;

/// Errors that can occur while managing resource locks.
#[derive(Debug, Error)]
pub enum LockError {
    /// Another task holds an unexpired lease on the resource.
    #[error("resource {resource_id} is locked by task {holder}")]
    Conflict {
        resource_id: ResourceId,
        holder: TaskId,
    },

    /// Invalid lock configuration.
    #[error("invalid lock configuration: {0}")]
    Configuration(String),

    #[error("lock database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("lock table poisoned: {0}")]
    LockPoisoned(String),

    #[error("invalid lock data: {0}")]
    InvalidData(String),
}

impl LockError {
    /// Returns the holder if this is a conflict.
    pub fn holder(&self) -> Option<&TaskId> {
        match self {
            LockError::Conflict { holder, .. } => Some(holder),
            _ => None,
        }
    }
}

/// Result type for lock operations.
pub type Result<T> = std::result::Result<T, LockError>;
