//! Execution request, result and progress types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use crate::ids::{ResourceId, TaskId};
use crate::task::{Action, TaskStatus};

/// Classification of a failed execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or invalid configuration. Fatal at setup.
    Configuration,
    /// Another task holds the resource lock.
    LockConflict,
    /// The subprocess exceeded its deadline and was killed.
    ProcessTimeout,
    /// The subprocess exited non-zero.
    ProcessFailure,
    /// The requested action has no dispatch.
    UnsupportedAction,
    /// The task store rejected a read or write.
    Persistence,
    /// The workspace could not be allocated or written.
    Workspace,
    /// The tool exited cleanly but reported error diagnostics.
    Diagnostics,
    /// The execution was cancelled.
    Cancelled,
    /// A lifecycle transition was refused.
    InvalidTransition,
}

impl ErrorKind {
    /// Returns true if re-running the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::LockConflict
                | ErrorKind::ProcessTimeout
                | ErrorKind::ProcessFailure
                | ErrorKind::Diagnostics
                | ErrorKind::Cancelled
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::LockConflict => "lock_conflict",
            ErrorKind::ProcessTimeout => "process_timeout",
            ErrorKind::ProcessFailure => "process_failure",
            ErrorKind::UnsupportedAction => "unsupported_action",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Workspace => "workspace",
            ErrorKind::Diagnostics => "diagnostics",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidTransition => "invalid_transition",
        };
        f.write_str(s)
    }
}

/// A request to run one action against one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteRequest {
    pub task_id: TaskId,
    pub resource_id: ResourceId,
    pub action: Action,
    /// Caller-supplied working directory. A fresh workspace is allocated when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,
    /// Configuration text written into the workspace before `init`.
    #[serde(default)]
    pub config: String,
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ExecuteRequest {
    /// Creates a request with no work dir, config or params.
    pub fn new(task_id: impl Into<TaskId>, resource_id: ResourceId, action: impl Into<Action>) -> Self {
        Self {
            task_id: task_id.into(),
            resource_id,
            action: action.into(),
            work_dir: None,
            config: String::new(),
            params: HashMap::new(),
        }
    }

    pub fn with_work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(dir.into());
        self
    }

    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Returns the param value or `"default"` when absent or empty.
    pub fn param_or_default(&self, key: &str) -> &str {
        self.params
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
            .unwrap_or("default")
    }
}

/// Add/change/destroy counts of a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PlanSummary {
    pub to_add: u32,
    pub to_change: u32,
    pub to_destroy: u32,
}

impl PlanSummary {
    pub fn new(to_add: u32, to_change: u32, to_destroy: u32) -> Self {
        Self {
            to_add,
            to_change,
            to_destroy,
        }
    }

    /// Returns true if the plan changes nothing.
    pub fn is_empty(&self) -> bool {
        self.to_add == 0 && self.to_change == 0 && self.to_destroy == 0
    }
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to destroy",
            self.to_add, self.to_change, self.to_destroy
        )
    }
}

/// Outcome of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecuteResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Diagnostic summary. Empty if no diagnostics were accumulated.
    pub output: String,
    /// Top-level cause. Empty on success.
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Wall-clock milliseconds.
    pub duration: u64,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<PlanSummary>,
}

impl ExecuteResult {
    /// Creates an empty result in the given status.
    pub fn new(task_id: TaskId, status: TaskStatus) -> Self {
        Self {
            task_id,
            status,
            output: String::new(),
            error: String::new(),
            error_kind: None,
            duration: 0,
            attributes: HashMap::new(),
            plan: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}

/// Snapshot of an execution's progress. Callers always receive a copy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Progress {
    pub phase: String,
    /// 0 to 100.
    pub percent: u8,
    /// Milliseconds since the execution started.
    pub elapsed: u64,
    pub message: String,
}

impl Progress {
    pub fn new(phase: impl Into<String>, percent: u8, message: impl Into<String>) -> Self {
        Self {
            phase: phase.into(),
            percent: percent.min(100),
            elapsed: 0,
            message: message.into(),
        }
    }
}
