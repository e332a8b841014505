//! The task history contract used by the orchestrator.

use prism_models::{Action, ExecutionTask, ResourceId, TaskId, TaskStatus};

use crate::error::{PersistenceError, Result};

/// Durable storage for execution task records.
///
/// Every operation is durable once it returns `Ok`. Implementations must be
/// safe to share between concurrently running executions.
pub trait TaskStore: Send + Sync {
    /// Inserts a new Pending record. Fails if the task id already exists.
    fn create(&self, task_id: &TaskId, resource_id: ResourceId, action: &Action)
        -> Result<ExecutionTask>;

    /// Loads a record, or `NotFound`.
    fn get(&self, task_id: &TaskId) -> Result<ExecutionTask>;

    /// Marks the task Running and stamps `started_at`.
    fn start(&self, task_id: &TaskId) -> Result<()>;

    /// Stores a terminal status, stamps `finished_at` and computes the duration.
    fn finish(&self, task_id: &TaskId, status: TaskStatus, output: &str, error: &str)
        -> Result<()>;

    /// Returns a Failed or Cancelled record to Pending, clearing results and
    /// timestamps. The status check and the write are one atomic step, so of
    /// two concurrent resets only one succeeds; the other gets `NotRetryable`.
    fn reset(&self, task_id: &TaskId) -> Result<()>;

    /// All records for a resource, newest first.
    fn list_by_resource(&self, resource_id: ResourceId) -> Result<Vec<ExecutionTask>>;

    /// All Failed records, newest first.
    fn list_failed(&self) -> Result<Vec<ExecutionTask>>;

    /// Deletes a record. Deleting a missing record is not an error.
    fn delete(&self, task_id: &TaskId) -> Result<()>;

    /// Stores Success or Failed.
    fn complete(&self, task_id: &TaskId, success: bool, output: &str, error: &str) -> Result<()> {
        let status = if success {
            TaskStatus::Success
        } else {
            TaskStatus::Failed
        };
        self.finish(task_id, status, output, error)
    }

    /// Stores Cancelled.
    fn cancel(&self, task_id: &TaskId, output: &str, error: &str) -> Result<()> {
        self.finish(task_id, TaskStatus::Cancelled, output, error)
    }

    /// Returns true if the stored task is Failed or Cancelled.
    fn can_retry(&self, task_id: &TaskId) -> Result<bool> {
        Ok(self.get(task_id)?.is_retryable())
    }
}

pub(crate) fn check_terminal(status: TaskStatus) -> Result<()> {
    if status.is_terminal() {
        Ok(())
    } else {
        Err(PersistenceError::InvalidData(format!(
            "{} is not a terminal status",
            status
        )))
    }
}

pub(crate) fn newest_first(tasks: &mut [ExecutionTask]) {
    tasks.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.task_id.cmp(&a.task_id))
    });
}
