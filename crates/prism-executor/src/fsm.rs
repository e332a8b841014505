//! Per-execution task lifecycle.
//!
//! ```text
//!   Pending --start--> Running --success--> Success
//!      |                  |----fail------> Failed
//!      |                  '----cancel----> Cancelled
//!      '------cancel-------------------->  Cancelled
//! ```

use std::fmt;
use std::sync::RwLock;

use prism_models::TaskStatus;
use serde::{Deserialize, Serialize};

use crate::error::{ExecutorError, Result};

/// Lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskEvent {
    Start,
    Success,
    Fail,
    Cancel,
}

impl TaskEvent {
    pub const ALL: [TaskEvent; 4] = [
        TaskEvent::Start,
        TaskEvent::Success,
        TaskEvent::Fail,
        TaskEvent::Cancel,
    ];
}

impl fmt::Display for TaskEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskEvent::Start => "start",
            TaskEvent::Success => "success",
            TaskEvent::Fail => "fail",
            TaskEvent::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

/// Every permitted `(from, event, to)` triple. Anything else is refused.
pub const TRANSITIONS: &[(TaskStatus, TaskEvent, TaskStatus)] = &[
    (TaskStatus::Pending, TaskEvent::Start, TaskStatus::Running),
    (TaskStatus::Running, TaskEvent::Success, TaskStatus::Success),
    (TaskStatus::Running, TaskEvent::Fail, TaskStatus::Failed),
    (TaskStatus::Pending, TaskEvent::Cancel, TaskStatus::Cancelled),
    (TaskStatus::Running, TaskEvent::Cancel, TaskStatus::Cancelled),
];

/// Looks up the target state for `event` fired in `from`.
pub fn next_state(from: TaskStatus, event: TaskEvent) -> Option<TaskStatus> {
    TRANSITIONS
        .iter()
        .find(|(src, ev, _)| *src == from && *ev == event)
        .map(|(_, _, dst)| *dst)
}

/// Tracks one task's lifecycle. Not reused across tasks.
#[derive(Debug, Default)]
pub struct TaskStateMachine {
    state: RwLock<TaskStatus>,
}

impl TaskStateMachine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the current state.
    pub fn current(&self) -> TaskStatus {
        match self.state.read() {
            Ok(state) => *state,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Returns true if `event` is permitted now.
    pub fn can(&self, event: TaskEvent) -> bool {
        next_state(self.current(), event).is_some()
    }

    /// Applies `event`, or fails without changing state.
    pub fn fire(&self, event: TaskEvent) -> Result<TaskStatus> {
        let mut state = self
            .state
            .write()
            .map_err(|e| ExecutorError::LockPoisoned(e.to_string()))?;
        let from = *state;
        let to = next_state(from, event).ok_or(ExecutorError::InvalidTransition { from, event })?;
        *state = to;
        Ok(to)
    }
}
