//! The executor abstraction.

use async_trait::async_trait;
use prism_models::{ExecuteRequest, ExecuteResult, Progress};

use crate::error::Result;

/// Something that drives one execution request to a terminal state.
///
/// Task-level failures (a non-zero exit, a lock conflict, a timeout) are
/// reported inside the returned [`ExecuteResult`]; `Err` means the request
/// could not be recorded at all.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Short name of the tool this executor drives.
    fn executor_type(&self) -> &'static str;

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResult>;

    /// Checks configuration text before it is handed to `execute`.
    fn validate(&self, config: &str) -> Result<()>;

    /// Copy of the latest progress of the current run.
    fn progress(&self) -> Progress;

    /// Stops the current run. Safe to call when no subprocess is running.
    fn cancel(&self) -> Result<()>;
}
