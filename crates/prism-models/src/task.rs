//! Execution task records.
//!
//! A task is one execution of a provisioning action against one resource.
//! The orchestrator owns the lifecycle; stores only keep snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::ids::{ResourceId, TaskId};

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created, not yet running.
    #[default]
    Pending,
    /// Subprocess work in progress.
    Running,
    /// Finished successfully.
    Success,
    /// Finished with an error.
    Failed,
    /// Cancelled before or during execution.
    Cancelled,
}

impl TaskStatus {
    /// Returns the lowercase name used in storage and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Success => "success",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }

    /// Returns true for Success, Failed and Cancelled.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Success | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }

    /// Returns true if a task in this status may be reset and re-executed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TaskStatus::Failed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "success" => Ok(TaskStatus::Success),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Provisioning action verb.
///
/// Unknown verbs are kept as [`Action::Other`] so that a request can carry
/// them to the executor, which rejects them as unsupported.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Action {
    Init,
    Plan,
    Apply,
    Destroy,
    Import,
    Other(String),
}

impl Action {
    /// Returns the verb as passed to the provisioning tool.
    pub fn as_str(&self) -> &str {
        match self {
            Action::Init => "init",
            Action::Plan => "plan",
            Action::Apply => "apply",
            Action::Destroy => "destroy",
            Action::Import => "import",
            Action::Other(verb) => verb,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&str> for Action {
    fn from(s: &str) -> Self {
        match s {
            "init" => Action::Init,
            "plan" => Action::Plan,
            "apply" => Action::Apply,
            "destroy" => Action::Destroy,
            "import" => Action::Import,
            other => Action::Other(other.to_string()),
        }
    }
}

impl From<String> for Action {
    fn from(s: String) -> Self {
        Action::from(s.as_str())
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.as_str().to_string()
    }
}

/// Persisted history record of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTask {
    pub task_id: TaskId,
    pub resource_id: ResourceId,
    pub action: Action,
    pub status: TaskStatus,
    /// Accumulated human-readable diagnostic summary.
    #[serde(default)]
    pub output: String,
    /// Top-level cause of failure.
    #[serde(default)]
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Milliseconds between `started_at` and `finished_at`.
    #[serde(default)]
    pub duration: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ExecutionTask {
    /// Creates a new pending task.
    pub fn new(task_id: TaskId, resource_id: ResourceId, action: Action) -> Self {
        let now = Utc::now();
        Self {
            task_id,
            resource_id,
            action,
            status: TaskStatus::Pending,
            output: String::new(),
            error: String::new(),
            started_at: None,
            finished_at: None,
            duration: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the task as running.
    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Running;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Records a terminal status. Duration is zero if the task never started.
    pub fn mark_finished(
        &mut self,
        status: TaskStatus,
        output: impl Into<String>,
        error: impl Into<String>,
        now: DateTime<Utc>,
    ) {
        self.status = status;
        self.output = output.into();
        self.error = error.into();
        self.finished_at = Some(now);
        self.duration = self
            .started_at
            .map(|started| (now - started).num_milliseconds())
            .unwrap_or(0);
        self.updated_at = now;
    }

    /// Returns the record to Pending, clearing results and timestamps.
    pub fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.output.clear();
        self.error.clear();
        self.started_at = None;
        self.finished_at = None;
        self.duration = 0;
        self.updated_at = Utc::now();
    }

    /// Returns true if the task can be retried.
    pub fn is_retryable(&self) -> bool {
        self.status.is_retryable()
    }
}
