//! Error types for the executor.

use prism_lock::LockError;
use prism_models::{ErrorKind, TaskId, TaskStatus};
use prism_persistence::PersistenceError;
use prism_runtime::{RunnerError, WorkspaceError};
use thiserror::Error;

use crate::fsm::TaskEvent;

/// Executor-specific errors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("persistence error: {0}")]
    Persistence(#[from] PersistenceError),

    #[error("workspace error: {0}")]
    Workspace(#[from] WorkspaceError),

    /// A tool phase did not exit cleanly.
    #[error("terraform {phase} failed: {source}")]
    Command {
        phase: String,
        #[source]
        source: RunnerError,
    },

    /// A tool phase exited zero but reported error diagnostics.
    #[error("terraform {phase} reported {count} error diagnostic(s)")]
    Diagnostics { phase: String, count: usize },

    #[error("unsupported action: {0}")]
    UnsupportedAction(String),

    #[error("invalid transition: cannot {event} from {from}")]
    InvalidTransition { from: TaskStatus, event: TaskEvent },

    #[error("task {0} is not retryable")]
    NotRetryable(TaskId),

    #[error("execution cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl ExecutorError {
    /// Classifies the error for callers and retry policy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ExecutorError::Lock(LockError::Conflict { .. }) => ErrorKind::LockConflict,
            ExecutorError::Lock(LockError::Configuration(_)) => ErrorKind::Configuration,
            ExecutorError::Lock(_) => ErrorKind::Persistence,
            ExecutorError::Persistence(_) | ExecutorError::LockPoisoned(_) => ErrorKind::Persistence,
            ExecutorError::Workspace(_) => ErrorKind::Workspace,
            ExecutorError::Command { source, .. } => match source {
                RunnerError::Timeout(_) => ErrorKind::ProcessTimeout,
                RunnerError::Cancelled => ErrorKind::Cancelled,
                RunnerError::EmptyCommand | RunnerError::Configuration(_) => {
                    ErrorKind::Configuration
                }
                _ => ErrorKind::ProcessFailure,
            },
            ExecutorError::Diagnostics { .. } => ErrorKind::Diagnostics,
            ExecutorError::UnsupportedAction(_) => ErrorKind::UnsupportedAction,
            ExecutorError::InvalidTransition { .. } | ExecutorError::NotRetryable(_) => {
                ErrorKind::InvalidTransition
            }
            ExecutorError::Cancelled => ErrorKind::Cancelled,
            ExecutorError::Configuration(_) => ErrorKind::Configuration,
        }
    }
}

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;
