//! Error types for the runtime crate.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Why a supervised command did not succeed.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("empty command")]
    EmptyCommand,

    /// The program could not be started.
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Deadline passed; the process group was killed.
    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    /// Caller cancellation; the process group was killed.
    #[error("command cancelled")]
    Cancelled,

    #[error("exit status {0}")]
    NonZeroExit(i32),

    /// Waiting on the child failed.
    #[error("failed to wait for command: {0}")]
    Wait(#[source] std::io::Error),

    #[error("invalid runner configuration: {0}")]
    Configuration(String),
}

impl RunnerError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, RunnerError::Timeout(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, RunnerError::Cancelled)
    }
}

/// Workspace allocation and scoped file I/O errors.
#[derive(Debug, Error)]
pub enum WorkspaceError {
    /// Refused to delete an empty or root path.
    #[error("refusing to clean unsafe path: {0:?}")]
    UnsafePath(PathBuf),

    /// A path segment or file name would escape its directory.
    #[error("invalid workspace component: {0:?}")]
    InvalidComponent(String),

    #[error("workspace I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result type for workspace operations.
pub type Result<T> = std::result::Result<T, WorkspaceError>;
