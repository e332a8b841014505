//! Terraform orchestration.
//!
//! One [`TerraformExecutor`] drives one task at a time:
//!
//! 1. record the task (Pending)
//! 2. take the resource lock, failing fast on conflict
//! 3. fire `start` and persist Running
//! 4. allocate a workspace and write the configuration
//! 5. run `init`, then the requested action, streaming every line to the hub
//! 6. fire `success` / `fail` / `cancel`, persist, broadcast completion
//!
//! The lock is released when the run returns, whatever the outcome.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use async_trait::async_trait;
use prism_events::BroadcastHub;
use prism_lock::LockManager;
use prism_models::{
    Action, ErrorKind, ExecuteRequest, ExecuteResult, PlanSummary, Progress, ResourceId, TaskId,
    TaskStatus,
};
use prism_persistence::{PersistenceError, TaskStore};
use prism_runtime::{strip_ansi, CommandRunner, RunnerConfig, RunnerError, WorkspaceAllocator};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::base::BaseExecutor;
use crate::classifier::{self, Diagnostic};
use crate::config::TerraformConfig;
use crate::error::{ExecutorError, Result};
use crate::executor::Executor;
use crate::fsm::TaskEvent;

const STATE_FILE: &str = "terraform.tfstate";

/// Params that pick the workspace path instead of becoming `-var` flags.
const RESERVED_PARAMS: [&str; 2] = ["provider", "region"];

/// Releases the resource lock on drop.
struct LockGuard<'a> {
    locks: &'a dyn LockManager,
    resource_id: ResourceId,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.locks.release(self.resource_id) {
            warn!(resource_id = self.resource_id, error = %e, "Failed to release lock");
        }
    }
}

/// What a successful dispatch produced.
#[derive(Debug, Default)]
struct Outcome {
    plan: Option<PlanSummary>,
    attributes: HashMap<String, String>,
}

/// Runs terraform actions against isolated workspaces.
pub struct TerraformExecutor {
    config: TerraformConfig,
    base: BaseExecutor,
    locks: Arc<dyn LockManager>,
    tasks: Arc<dyn TaskStore>,
    hub: Arc<BroadcastHub>,
    workspace: WorkspaceAllocator,
    runner: CommandRunner,
    errors: Mutex<Vec<Diagnostic>>,
}

impl TerraformExecutor {
    pub fn new(
        config: TerraformConfig,
        locks: Arc<dyn LockManager>,
        tasks: Arc<dyn TaskStore>,
        hub: Arc<BroadcastHub>,
    ) -> Result<Self> {
        config.validate()?;

        let runner_config = config
            .env
            .iter()
            .fold(RunnerConfig::new().with_timeout(config.timeout), |c, (k, v)| {
                c.with_env(k, v)
            });
        runner_config
            .validate()
            .map_err(|e| ExecutorError::Configuration(e.to_string()))?;

        Ok(Self {
            workspace: WorkspaceAllocator::new(&config.base_path),
            runner: CommandRunner::new(runner_config),
            base: BaseExecutor::new(),
            errors: Mutex::new(Vec::new()),
            config,
            locks,
            tasks,
            hub,
        })
    }

    pub fn config(&self) -> &TerraformConfig {
        &self.config
    }

    pub fn hub(&self) -> &Arc<BroadcastHub> {
        &self.hub
    }

    /// Error diagnostics collected during the current run.
    pub fn errors(&self) -> Vec<Diagnostic> {
        self.errors_guard().clone()
    }

    /// Re-runs a Failed or Cancelled task with its stored resource and action.
    pub async fn retry(&self, task_id: &TaskId) -> Result<ExecuteResult> {
        self.retry_with(task_id, |request| request).await
    }

    /// Like [`retry`](Self::retry), letting the caller supply the work dir,
    /// configuration and params again. Identity fields always come from the
    /// stored record.
    ///
    /// Concurrent retries of one task are safe: the store resets the record
    /// only from Failed or Cancelled, so every caller but the first gets
    /// `NotRetryable` and leaves the winning run's record alone.
    pub async fn retry_with<F>(&self, task_id: &TaskId, configure: F) -> Result<ExecuteResult>
    where
        F: FnOnce(ExecuteRequest) -> ExecuteRequest + Send,
    {
        let task = self.tasks.get(task_id)?;
        if !task.is_retryable() {
            return Err(ExecutorError::NotRetryable(task_id.clone()));
        }
        match self.tasks.reset(task_id) {
            Ok(()) => {}
            Err(PersistenceError::NotRetryable { .. }) => {
                return Err(ExecutorError::NotRetryable(task_id.clone()))
            }
            Err(e) => return Err(e.into()),
        }
        info!(task_id = %task_id, previous = %task.status, "Retrying task");

        let mut request = configure(ExecuteRequest::new(
            task.task_id.clone(),
            task.resource_id,
            task.action.clone(),
        ));
        request.task_id = task.task_id;
        request.resource_id = task.resource_id;
        request.action = task.action;

        self.run(request, false).await
    }

    async fn run(&self, request: ExecuteRequest, create: bool) -> Result<ExecuteResult> {
        if request.task_id.is_blank() {
            return Err(ExecutorError::Configuration(
                "task id must not be empty".to_string(),
            ));
        }
        let cancel = self.base.begin()?;
        self.errors_guard().clear();
        let started = Instant::now();
        let task_id = request.task_id.clone();

        if create {
            self.tasks
                .create(&task_id, request.resource_id, &request.action)?;
        }
        info!(
            task_id = %task_id,
            resource_id = request.resource_id,
            action = %request.action,
            "Executing task"
        );

        if let Err(e) = self.locks.acquire(request.resource_id, &task_id) {
            return Ok(self.finish(&task_id, started, Err(e.into())));
        }
        let _lock = LockGuard {
            locks: self.locks.as_ref(),
            resource_id: request.resource_id,
        };

        let outcome = match self.start(&task_id) {
            Ok(()) => self.run_in_workspace(&request, &cancel).await,
            Err(e) => Err(e),
        };
        Ok(self.finish(&task_id, started, outcome))
    }

    fn start(&self, task_id: &TaskId) -> Result<()> {
        self.base.transition(TaskEvent::Start)?;
        self.tasks.start(task_id)?;
        Ok(())
    }

    async fn run_in_workspace(
        &self,
        request: &ExecuteRequest,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let (work_dir, allocated) = match &request.work_dir {
            Some(dir) => (dir.clone(), false),
            None => (self.allocate(request)?, true),
        };

        let outcome = match self.write_config(&work_dir, &request.config) {
            Ok(()) => self.dispatch(request, &work_dir, cancel).await,
            Err(e) => Err(e),
        };

        if allocated && self.config.clean_workspace {
            if let Err(e) = self.workspace.clean(&work_dir) {
                warn!(path = %work_dir.display(), error = %e, "Failed to clean workspace");
            }
        }
        outcome
    }

    fn allocate(&self, request: &ExecuteRequest) -> Result<PathBuf> {
        Ok(self.workspace.create(
            request.param_or_default("provider"),
            request.param_or_default("region"),
            request.resource_id,
            &request.task_id,
        )?)
    }

    fn write_config(&self, work_dir: &Path, config: &str) -> Result<()> {
        if config.trim().is_empty() {
            return Ok(());
        }
        let path = self
            .workspace
            .write_file(work_dir, config_filename(config), config)?;
        debug!(path = %path.display(), "Wrote configuration");
        Ok(())
    }

    async fn dispatch(
        &self,
        request: &ExecuteRequest,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<Outcome> {
        let task_id = &request.task_id;
        match &request.action {
            Action::Init => {
                self.init(task_id, work_dir, cancel).await?;
                Ok(Outcome::default())
            }
            Action::Plan => {
                self.init(task_id, work_dir, cancel).await?;
                self.report(task_id, "plan", 30, "Running terraform plan...");
                let args = with_vars(&["-input=false", "-json"], &request.params);
                let output = self.terraform(task_id, work_dir, "plan", args, cancel).await?;

                let plan = classifier::parse_plan(&strip_ansi(&output));
                info!(
                    task_id = %task_id,
                    to_add = plan.to_add,
                    to_change = plan.to_change,
                    to_destroy = plan.to_destroy,
                    "Plan summarized"
                );
                self.hub.send_log(task_id, plan.to_string());
                Ok(Outcome {
                    plan: Some(plan),
                    ..Default::default()
                })
            }
            Action::Apply => {
                self.init(task_id, work_dir, cancel).await?;
                self.report(task_id, "apply", 50, "Running terraform apply...");
                let args = with_vars(&["-auto-approve", "-json"], &request.params);
                self.terraform(task_id, work_dir, "apply", args, cancel).await?;

                self.report(task_id, "apply", 90, "Parsing tfstate...");
                Ok(Outcome {
                    attributes: self.read_attributes(task_id, work_dir),
                    ..Default::default()
                })
            }
            Action::Destroy => {
                self.init(task_id, work_dir, cancel).await?;
                self.report(task_id, "destroy", 50, "Running terraform destroy...");
                let args = with_vars(&["-auto-approve", "-json"], &request.params);
                self.terraform(task_id, work_dir, "destroy", args, cancel).await?;
                Ok(Outcome::default())
            }
            other => Err(ExecutorError::UnsupportedAction(other.to_string())),
        }
    }

    async fn init(
        &self,
        task_id: &TaskId,
        work_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.report(task_id, "init", 10, "Running terraform init...");
        self.terraform(task_id, work_dir, "init", vec!["-no-color".to_string()], cancel)
            .await
    }

    /// Runs `terraform -chdir=<work_dir> <phase> <args>` and gates on its
    /// exit status and error diagnostics.
    async fn terraform(
        &self,
        task_id: &TaskId,
        work_dir: &Path,
        phase: &str,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        if cancel.is_cancelled() {
            return Err(ExecutorError::Cancelled);
        }

        let mut command = vec![
            self.config.binary.to_string_lossy().into_owned(),
            format!("-chdir={}", work_dir.display()),
            phase.to_string(),
        ];
        command.extend(args);
        debug!(task_id = %task_id, args = ?command, "Running terraform");

        let errors_before = self.errors_guard().len();
        let result = self
            .runner
            .run_streaming(&command, cancel, |line| self.handle_line(task_id, line))
            .await;
        let new_errors = self.errors_guard().len().saturating_sub(errors_before);

        debug!(
            task_id = %task_id,
            phase,
            exit_code = result.exit_code,
            duration_ms = result.duration.as_millis() as u64,
            "Terraform finished"
        );

        match result.error {
            Some(RunnerError::Cancelled) => Err(ExecutorError::Cancelled),
            Some(source) => Err(ExecutorError::Command {
                phase: phase.to_string(),
                source,
            }),
            None if new_errors > 0 => Err(ExecutorError::Diagnostics {
                phase: phase.to_string(),
                count: new_errors,
            }),
            None => Ok(result.output),
        }
    }

    /// Classifies one output line and forwards it to observers.
    fn handle_line(&self, task_id: &TaskId, line: &str) {
        let line = strip_ansi(line);
        let Some(msg) = classifier::parse_line(&line) else {
            self.hub.send_log(task_id, line);
            return;
        };

        if let Some(diag) = msg.error_diagnostic() {
            self.errors_guard().push(diag.clone());
        }
        if msg.kind == "version" {
            debug!(version = msg.terraform.as_deref().unwrap_or(""), "Terraform version");
        }

        // Escapes inside JSON strings only appear once decoded.
        let message = strip_ansi(&msg.message);
        if msg.hook.is_some() && !message.is_empty() {
            self.base.set_progress_message(&message);
        }
        if message.is_empty() {
            self.hub.send_log(task_id, line);
        } else {
            self.hub.send_log(task_id, message);
        }
    }

    fn read_attributes(&self, task_id: &TaskId, work_dir: &Path) -> HashMap<String, String> {
        if !self.workspace.exists(&work_dir.join(STATE_FILE)) {
            debug!(task_id = %task_id, "No state file after apply");
            return HashMap::new();
        }
        let data = match self.workspace.read_file(work_dir, STATE_FILE) {
            Ok(data) => data,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to read state file");
                return HashMap::new();
            }
        };

        let mut attributes = classifier::parse_state(&data);
        attributes.extend(classifier::extract_attributes(
            &data,
            &self.config.attribute_queries,
        ));
        info!(task_id = %task_id, count = attributes.len(), "Extracted state attributes");
        self.hub.send_log(
            task_id,
            format!("Extracted {} attributes from tfstate", attributes.len()),
        );
        attributes
    }

    fn report(&self, task_id: &TaskId, phase: &str, percent: u8, message: &str) {
        let progress = self.base.update_progress(phase, percent, message);
        self.hub.send_progress(task_id, &progress);
    }

    /// Settles the lifecycle, persists the terminal record and broadcasts
    /// completion.
    fn finish(
        &self,
        task_id: &TaskId,
        started: Instant,
        outcome: Result<Outcome>,
    ) -> ExecuteResult {
        let mut result = ExecuteResult::new(task_id.clone(), TaskStatus::Success);
        result.output = classifier::summarize_errors(&self.errors());
        result.duration = started.elapsed().as_millis() as u64;

        let settled = outcome.and_then(|outcome| {
            // A cancel that lands after the last phase exited wins.
            self.base
                .transition(TaskEvent::Success)
                .map_err(|_| ExecutorError::Cancelled)?;
            Ok(outcome)
        });

        match settled {
            Ok(outcome) => {
                result.plan = outcome.plan;
                result.attributes = outcome.attributes;
                self.report(task_id, "complete", 100, "Completed");
                if let Err(e) = self.tasks.complete(task_id, true, &result.output, "") {
                    warn!(task_id = %task_id, error = %e, "Failed to persist completion");
                }
                info!(task_id = %task_id, duration_ms = result.duration, "Task succeeded");
            }
            Err(err) => self.fail(&mut result, err),
        }

        let payload = serde_json::to_value(&result).unwrap_or(Value::Null);
        self.hub.send_complete(task_id, result.is_success(), payload);
        result
    }

    fn fail(&self, result: &mut ExecuteResult, err: ExecutorError) {
        let task_id = result.task_id.clone();
        let error = err.to_string();
        let cancelled =
            err.kind() == ErrorKind::Cancelled || self.base.status() == TaskStatus::Cancelled;

        let persisted = if cancelled {
            if self.base.status() != TaskStatus::Cancelled {
                if let Err(e) = self.base.transition(TaskEvent::Cancel) {
                    debug!(task_id = %task_id, error = %e, "Cancel transition refused");
                }
            }
            result.status = TaskStatus::Cancelled;
            result.error_kind = Some(ErrorKind::Cancelled);
            warn!(task_id = %task_id, error = %error, "Task cancelled");
            self.tasks.cancel(&task_id, &result.output, &error)
        } else {
            if self.base.status() == TaskStatus::Running {
                if let Err(e) = self.base.transition(TaskEvent::Fail) {
                    debug!(task_id = %task_id, error = %e, "Fail transition refused");
                }
            }
            result.status = TaskStatus::Failed;
            result.error_kind = Some(err.kind());
            warn!(task_id = %task_id, kind = %err.kind(), error = %error, "Task failed");
            self.tasks.complete(&task_id, false, &result.output, &error)
        };
        if let Err(e) = persisted {
            warn!(task_id = %task_id, error = %e, "Failed to persist completion");
        }

        self.hub.send_error(&task_id, error.clone());
        result.error = error;
    }

    fn errors_guard(&self) -> MutexGuard<'_, Vec<Diagnostic>> {
        self.errors.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl Executor for TerraformExecutor {
    fn executor_type(&self) -> &'static str {
        "terraform"
    }

    async fn execute(&self, request: ExecuteRequest) -> Result<ExecuteResult> {
        self.run(request, true).await
    }

    fn validate(&self, config: &str) -> Result<()> {
        let trimmed = config.trim();
        if trimmed.is_empty() {
            return Err(ExecutorError::Configuration(
                "configuration is empty".to_string(),
            ));
        }
        if trimmed.starts_with('{') {
            serde_json::from_str::<Value>(trimmed).map_err(|e| {
                ExecutorError::Configuration(format!("invalid JSON configuration: {}", e))
            })?;
        }
        Ok(())
    }

    fn progress(&self) -> Progress {
        self.base.progress()
    }

    fn cancel(&self) -> Result<()> {
        info!("Cancelling current execution");
        self.base.cancel()
    }
}

/// `main.tf.json` for a JSON object, `main.tf` for anything else.
fn config_filename(config: &str) -> &'static str {
    match serde_json::from_str::<Value>(config) {
        Ok(Value::Object(_)) => "main.tf.json",
        _ => "main.tf",
    }
}

/// Appends sorted `-var key=value` pairs for every non-reserved param.
fn with_vars(flags: &[&str], params: &HashMap<String, String>) -> Vec<String> {
    let mut vars: Vec<(&String, &String)> = params
        .iter()
        .filter(|(k, _)| !RESERVED_PARAMS.contains(&k.as_str()))
        .collect();
    vars.sort();

    flags
        .iter()
        .map(|f| f.to_string())
        .chain(
            vars.into_iter()
                .flat_map(|(k, v)| ["-var".to_string(), format!("{}={}", k, v)]),
        )
        .collect()
}
