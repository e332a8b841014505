//! State shared by every executor: progress, lifecycle and cancellation.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use prism_models::{Progress, TaskStatus};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{ExecutorError, Result};
use crate::fsm::{TaskEvent, TaskStateMachine};

#[derive(Debug)]
struct Run {
    fsm: Arc<TaskStateMachine>,
    cancel: CancellationToken,
    started: Instant,
}

impl Default for Run {
    fn default() -> Self {
        Self {
            fsm: Arc::new(TaskStateMachine::new()),
            cancel: CancellationToken::new(),
            started: Instant::now(),
        }
    }
}

/// Progress, state machine and cancellation handle of the current run.
///
/// Each call to [`begin`](Self::begin) installs a fresh state machine and
/// cancellation token, so a finished run never leaks into the next one.
#[derive(Debug, Default)]
pub struct BaseExecutor {
    run: RwLock<Run>,
    progress: RwLock<Progress>,
}

impl BaseExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new run and returns its cancellation token.
    pub fn begin(&self) -> Result<CancellationToken> {
        let run = Run::default();
        let token = run.cancel.clone();
        *self
            .run
            .write()
            .map_err(|e| ExecutorError::LockPoisoned(e.to_string()))? = run;
        *self
            .progress
            .write()
            .map_err(|e| ExecutorError::LockPoisoned(e.to_string()))? = Progress::default();
        Ok(token)
    }

    fn fsm(&self) -> Result<Arc<TaskStateMachine>> {
        Ok(self
            .run
            .read()
            .map_err(|e| ExecutorError::LockPoisoned(e.to_string()))?
            .fsm
            .clone())
    }

    /// Lifecycle state of the current run.
    pub fn status(&self) -> TaskStatus {
        self.fsm().map(|f| f.current()).unwrap_or_default()
    }

    pub fn transition(&self, event: TaskEvent) -> Result<TaskStatus> {
        let to = self.fsm()?.fire(event)?;
        debug!(%event, state = %to, "Task transition");
        Ok(to)
    }

    /// Milliseconds since the current run began.
    pub fn elapsed_ms(&self) -> u64 {
        self.run
            .read()
            .map(|r| r.started.elapsed().as_millis() as u64)
            .unwrap_or(0)
    }

    /// Replaces the progress snapshot and returns a copy of it.
    pub fn update_progress(&self, phase: &str, percent: u8, message: &str) -> Progress {
        let mut progress = Progress::new(phase, percent, message);
        progress.elapsed = self.elapsed_ms();
        if let Ok(mut current) = self.progress.write() {
            *current = progress.clone();
        }
        progress
    }

    /// Changes only the message of the current snapshot.
    pub fn set_progress_message(&self, message: &str) {
        let elapsed = self.elapsed_ms();
        if let Ok(mut current) = self.progress.write() {
            current.message = message.to_string();
            current.elapsed = elapsed;
        }
    }

    /// A copy of the latest progress.
    pub fn progress(&self) -> Progress {
        match self.progress.read() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Signals the running subprocess to stop and fires `cancel`.
    pub fn cancel(&self) -> Result<()> {
        let (fsm, token) = {
            let run = self
                .run
                .read()
                .map_err(|e| ExecutorError::LockPoisoned(e.to_string()))?;
            (run.fsm.clone(), run.cancel.clone())
        };
        fsm.fire(TaskEvent::Cancel)?;
        token.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_installs_fresh_run() {
        let base = BaseExecutor::new();
        let first = base.begin().unwrap();
        base.transition(TaskEvent::Start).unwrap();
        base.transition(TaskEvent::Success).unwrap();

        let second = base.begin().unwrap();
        assert_eq!(base.status(), TaskStatus::Pending);
        base.cancel().unwrap();
        assert!(second.is_cancelled());
        assert!(!first.is_cancelled());
    }

    #[test]
    fn test_cancel_from_terminal_is_refused() {
        let base = BaseExecutor::new();
        let token = base.begin().unwrap();
        base.transition(TaskEvent::Start).unwrap();
        base.transition(TaskEvent::Fail).unwrap();

        assert!(matches!(
            base.cancel(),
            Err(ExecutorError::InvalidTransition { .. })
        ));
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_progress_is_a_copy() {
        let base = BaseExecutor::new();
        base.begin().unwrap();
        base.update_progress("plan", 30, "Running terraform plan...");

        let mut copy = base.progress();
        copy.percent = 99;

        let current = base.progress();
        assert_eq!(current.phase, "plan");
        assert_eq!(current.percent, 30);

        base.set_progress_message("aws_instance.web: Creating...");
        assert_eq!(base.progress().message, "aws_instance.web: Creating...");
        assert_eq!(base.progress().percent, 30);
    }
}
