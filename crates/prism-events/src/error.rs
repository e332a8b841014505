//! Error types for hub operations.

use thiserror::Error;

/// Errors that can occur during hub operations.
#[derive(Error, Debug)]
pub enum HubError {
    /// Message could not be encoded for the wire.
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Lock poisoned (thread panicked while holding lock).
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),

    #[error("invalid hub configuration: {0}")]
    Configuration(String),
}

/// Result type alias for hub operations.
pub type Result<T> = std::result::Result<T, HubError>;
