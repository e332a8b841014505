//! Command handlers for CLI subcommands.

use std::fs;
use std::sync::Arc;
use std::time::Duration;

use prism_events::{BroadcastHub, HubConfig, Message, MessageType, Subscription};
use prism_executor::{Executor, TerraformConfig, TerraformExecutor};
use prism_lock::{LockBackend, LockConfig, LockManager};
use prism_models::{ExecuteRequest, ExecuteResult, ExecutionTask, ResourceId, TaskId};
use prism_persistence::{FileTaskStore, SqliteTaskStore, TaskStore};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cli::{Commands, LockCommands, RunInputs};
use crate::config::{LockKind, Settings, StoreKind};

/// Result type for command operations.
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Shared components for one CLI invocation.
pub struct Context {
    pub settings: Settings,
    pub locks: Arc<dyn LockManager>,
    pub tasks: Arc<dyn TaskStore>,
    pub hub: Arc<BroadcastHub>,
}

impl Context {
    pub fn open(settings: &Settings) -> Result<Self> {
        fs::create_dir_all(settings.state_dir())?;

        let backend = match settings.locks {
            LockKind::Sqlite => LockBackend::Sqlite(settings.database_path()),
            LockKind::Memory => LockBackend::Memory,
        };
        let lock_config = LockConfig::new()
            .with_backend(backend)
            .with_lease(settings.lock_lease);
        lock_config.validate()?;
        let locks = lock_config.open()?;

        let tasks: Arc<dyn TaskStore> = match settings.store {
            StoreKind::Sqlite => Arc::new(SqliteTaskStore::open(settings.database_path())?),
            StoreKind::File => Arc::new(FileTaskStore::new(settings.state_dir())),
        };

        let hub_config = HubConfig::new().with_capacity(settings.hub_capacity);
        hub_config.validate()?;

        Ok(Self {
            settings: settings.clone(),
            locks,
            tasks,
            hub: Arc::new(BroadcastHub::new(hub_config)),
        })
    }

    fn executor(&self, timeout: Option<u64>) -> Result<Arc<TerraformExecutor>> {
        let config = TerraformConfig::new()
            .with_binary(self.settings.terraform_bin()?)
            .with_base_path(self.settings.workspaces_dir())
            .with_timeout(timeout.map_or(self.settings.timeout, Duration::from_secs))
            .with_clean_workspace(!self.settings.keep_workspaces);
        Ok(Arc::new(TerraformExecutor::new(
            config,
            self.locks.clone(),
            self.tasks.clone(),
            self.hub.clone(),
        )?))
    }
}

/// Execute a CLI command.
pub async fn execute(command: Commands, settings: &Settings, json: bool) -> Result<()> {
    let ctx = Context::open(settings)?;

    match command {
        Commands::Run {
            resource_id,
            action,
            task_id,
            inputs,
        } => cmd_run(&ctx, resource_id, &action, task_id, inputs, json).await,
        Commands::Retry { task_id, inputs } => cmd_retry(&ctx, task_id, inputs, json).await,
        Commands::Task { task_id } => cmd_task(&ctx, &task_id, json),
        Commands::History { resource_id } => {
            print_tasks(&ctx.tasks.list_by_resource(resource_id)?, json)
        }
        Commands::Failed => print_tasks(&ctx.tasks.list_failed()?, json),
        Commands::Lock { command } => cmd_lock(&ctx, command, json),
        Commands::Migrate => cmd_migrate(&ctx),
    }
}

/// Fills the request from `inputs`, validating any configuration file.
fn apply_inputs(
    executor: &TerraformExecutor,
    mut request: ExecuteRequest,
    inputs: &RunInputs,
) -> Result<ExecuteRequest> {
    if let Some(dir) = &inputs.workdir {
        request = request.with_work_dir(dir);
    }
    if let Some(path) = &inputs.config_file {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        executor.validate(&text)?;
        request = request.with_config(text);
    }
    for (key, value) in &inputs.vars {
        request = request.with_param(key, value);
    }
    Ok(request)
}

async fn cmd_run(
    ctx: &Context,
    resource_id: ResourceId,
    action: &str,
    task_id: Option<String>,
    inputs: RunInputs,
    json: bool,
) -> Result<()> {
    let executor = ctx.executor(inputs.timeout)?;
    let task_id = task_id
        .map(TaskId::from)
        .unwrap_or_else(|| TaskId::generate("task"));
    let request = apply_inputs(
        &executor,
        ExecuteRequest::new(task_id.clone(), resource_id, action),
        &inputs,
    )?;

    info!(task_id = %task_id, resource_id, action, "Starting run");
    let subscription = ctx.hub.register(&task_id)?;
    let runner = executor.clone();
    let handle = tokio::spawn(async move { runner.execute(request).await });

    let result = follow(&executor, &ctx.hub, subscription, handle, json).await?;
    report(&result, json)
}

async fn cmd_retry(ctx: &Context, task_id: String, inputs: RunInputs, json: bool) -> Result<()> {
    let executor = ctx.executor(inputs.timeout)?;
    let task_id = TaskId::from(task_id);

    // Validate inputs before the stored record is reset.
    let template = apply_inputs(&executor, ExecuteRequest::new(task_id.clone(), 0, "init"), &inputs)?;

    let subscription = ctx.hub.register(&task_id)?;
    let runner = executor.clone();
    let id = task_id.clone();
    let handle = tokio::spawn(async move {
        runner
            .retry_with(&id, move |mut request| {
                request.work_dir = template.work_dir;
                request.config = template.config;
                request.params = template.params;
                request
            })
            .await
    });

    let result = follow(&executor, &ctx.hub, subscription, handle, json).await?;
    report(&result, json)
}

/// Prints hub events until the execution finishes. Ctrl-C cancels it.
async fn follow(
    executor: &TerraformExecutor,
    hub: &BroadcastHub,
    mut subscription: Subscription,
    mut handle: JoinHandle<prism_executor::Result<ExecuteResult>>,
    json: bool,
) -> Result<ExecuteResult> {
    let mut cancelling = false;
    let joined = loop {
        tokio::select! {
            joined = &mut handle => break joined,
            Some(message) = subscription.recv_message() => print_event(&message, json),
            signal = tokio::signal::ctrl_c(), if !cancelling => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                cancelling = true;
                eprintln!("Cancelling...");
                if let Err(e) = executor.cancel() {
                    warn!(error = %e, "Cancel refused");
                }
            }
        }
    };

    while let Some(raw) = subscription.try_recv() {
        match serde_json::from_str::<Message>(&raw) {
            Ok(message) => print_event(&message, json),
            Err(e) => warn!(error = %e, "Skipping undecodable event"),
        }
    }
    hub.unregister(&subscription.task_id, subscription.id)?;

    Ok(joined??)
}

fn print_event(message: &Message, json: bool) {
    if json {
        match message.to_json() {
            Ok(line) => println!("{}", line),
            Err(e) => warn!(error = %e, "Failed to encode event"),
        }
        return;
    }
    match message.kind {
        MessageType::Log => println!("{}", message.data.as_str().unwrap_or_default()),
        MessageType::Progress => eprintln!(
            "[{:>3}%] {}",
            message.data["percent"].as_u64().unwrap_or(0),
            message.data["message"].as_str().unwrap_or_default()
        ),
        MessageType::Error => eprintln!("error: {}", message.data.as_str().unwrap_or_default()),
        MessageType::Complete => {}
    }
}

fn report(result: &ExecuteResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else {
        println!();
        println!("Task {}: {} ({} ms)", result.task_id, result.status, result.duration);
        if let Some(plan) = &result.plan {
            println!("  {}", plan);
        }
        let mut attributes: Vec<_> = result.attributes.iter().collect();
        attributes.sort();
        for (name, value) in attributes {
            println!("  {} = {}", name, value);
        }
        if !result.output.is_empty() {
            println!("{}", result.output);
        }
    }

    if result.is_success() {
        Ok(())
    } else {
        Err(format!("task {} {}: {}", result.task_id, result.status, result.error).into())
    }
}

fn cmd_task(ctx: &Context, task_id: &str, json: bool) -> Result<()> {
    let task = ctx.tasks.get(&TaskId::from(task_id))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&task)?);
        return Ok(());
    }

    println!("Task:      {}", task.task_id);
    println!("Resource:  {}", task.resource_id);
    println!("Action:    {}", task.action);
    println!("Status:    {}", task.status);
    println!("Created:   {}", task.created_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(started) = task.started_at {
        println!("Started:   {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(finished) = task.finished_at {
        println!("Finished:  {}", finished.format("%Y-%m-%d %H:%M:%S"));
        println!("Duration:  {} ms", task.duration);
    }
    if !task.error.is_empty() {
        println!("Error:     {}", task.error);
    }
    if !task.output.is_empty() {
        println!("\n{}", task.output);
    }
    Ok(())
}

fn print_tasks(tasks: &[ExecutionTask], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }

    println!(
        "{:<40} {:>8} {:<8} {:<10} {:<19} {:>10}",
        "TASK", "RESOURCE", "ACTION", "STATUS", "CREATED", "DURATION"
    );
    for task in tasks {
        println!(
            "{:<40} {:>8} {:<8} {:<10} {:<19} {:>8}ms",
            task.task_id,
            task.resource_id,
            task.action,
            task.status,
            task.created_at.format("%Y-%m-%d %H:%M:%S"),
            task.duration
        );
    }
    Ok(())
}

fn cmd_lock(ctx: &Context, command: LockCommands, json: bool) -> Result<()> {
    match command {
        LockCommands::Status { resource_id } => {
            let status = ctx.locks.status(resource_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&status)?);
                return Ok(());
            }
            match status {
                Some(lock) => println!(
                    "Resource {} is locked by task {} until {}",
                    resource_id,
                    lock.task_id,
                    lock.expires_at.format("%Y-%m-%d %H:%M:%S")
                ),
                None => println!("Resource {} is not locked", resource_id),
            }
        }
        LockCommands::Release { resource_id } => {
            ctx.locks.release(resource_id)?;
            warn!(resource_id, "Lock released by operator");
            println!("Released lock on resource {}", resource_id);
        }
        LockCommands::Purge => {
            let purged = ctx.locks.purge_expired()?;
            println!("Purged {} expired lock(s)", purged);
        }
    }
    Ok(())
}

fn cmd_migrate(ctx: &Context) -> Result<()> {
    // Opening the context already created every table.
    let s = &ctx.settings;
    match (s.store, s.locks) {
        (StoreKind::File, LockKind::Memory) => {
            println!("Nothing to migrate; task records under {}", s.state_dir().display())
        }
        (StoreKind::Sqlite, _) | (_, LockKind::Sqlite) => {
            println!("Database ready at {}", s.database_path().display())
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn settings(dir: &std::path::Path, store: &str) -> Settings {
        let store = store.to_string();
        Settings::from_lookup(dir.to_path_buf(), move |key| match key {
            "PRISM_STORE_BACKEND" => Some(store.clone()),
            "PRISM_TERRAFORM_BIN" => Some("/nonexistent/terraform".to_string()),
            _ => None,
        })
        .unwrap()
    }

    #[test]
    fn test_context_shares_database() {
        let dir = tempdir().unwrap();
        let s = settings(dir.path(), "sqlite");
        let ctx = Context::open(&s).unwrap();

        ctx.locks.acquire(1, &TaskId::from("cli")).unwrap();
        ctx.tasks
            .create(&TaskId::from("cli"), 1, &prism_models::Action::Plan)
            .unwrap();
        assert!(s.database_path().exists());

        let reopened = Context::open(&s).unwrap();
        assert!(reopened.locks.is_locked(1));
        assert_eq!(reopened.tasks.list_by_resource(1).unwrap().len(), 1);
    }

    #[test]
    fn test_file_store_context() {
        let dir = tempdir().unwrap();
        let ctx = Context::open(&settings(dir.path(), "file")).unwrap();
        ctx.tasks
            .create(&TaskId::from("t"), 2, &prism_models::Action::Apply)
            .unwrap();
        assert!(dir.path().join("tasks").join("t.json").exists());
    }

    #[test]
    fn test_memory_locks_without_terraform() {
        let dir = tempdir().unwrap();
        let mut s = settings(dir.path(), "file");
        s.locks = LockKind::Memory;
        s.terraform_bin = None;

        let ctx = Context::open(&s).unwrap();
        ctx.locks.acquire(3, &TaskId::from("a")).unwrap();
        assert!(!s.database_path().exists());

        let err = ctx.executor(None).err().unwrap();
        assert!(err.to_string().contains("PRISM_TERRAFORM_BIN"));
    }

    #[test]
    fn test_apply_inputs() {
        let dir = tempdir().unwrap();
        let ctx = Context::open(&settings(dir.path(), "sqlite")).unwrap();
        let executor = ctx.executor(Some(5)).unwrap();
        assert_eq!(executor.config().timeout, Duration::from_secs(5));

        let config_file = dir.path().join("main.tf.json");
        fs::write(&config_file, r#"{"terraform": {}}"#).unwrap();
        let inputs = RunInputs {
            workdir: Some(PathBuf::from("/tmp/ws")),
            config_file: Some(config_file),
            vars: vec![("env".into(), "prod".into())],
            timeout: None,
        };

        let request = apply_inputs(&executor, ExecuteRequest::new("t", 1, "plan"), &inputs).unwrap();
        assert_eq!(request.work_dir, Some(PathBuf::from("/tmp/ws")));
        assert_eq!(request.config, r#"{"terraform": {}}"#);
        assert_eq!(request.params["env"], "prod");
    }

    #[test]
    fn test_apply_inputs_rejects_bad_config() {
        let dir = tempdir().unwrap();
        let ctx = Context::open(&settings(dir.path(), "sqlite")).unwrap();
        let executor = ctx.executor(None).unwrap();

        let config_file = dir.path().join("broken.tf.json");
        fs::write(&config_file, "{ broken").unwrap();
        let inputs = RunInputs {
            config_file: Some(config_file),
            ..Default::default()
        };
        assert!(apply_inputs(&executor, ExecuteRequest::new("t", 1, "plan"), &inputs).is_err());

        let missing = RunInputs {
            config_file: Some(dir.path().join("missing.tf")),
            ..Default::default()
        };
        assert!(apply_inputs(&executor, ExecuteRequest::new("t", 1, "plan"), &missing).is_err());
    }

    #[test]
    fn test_report_fails_for_failed_task() {
        let mut result = ExecuteResult::new(TaskId::from("t"), prism_models::TaskStatus::Failed);
        result.error = "unsupported action: import".into();
        let err = report(&result, true).unwrap_err();
        assert_eq!(err.to_string(), "task t failed: unsupported action: import");

        let ok = ExecuteResult::new(TaskId::from("t"), prism_models::TaskStatus::Success);
        assert!(report(&ok, true).is_ok());
    }

    #[test]
    fn test_lock_commands() {
        let dir = tempdir().unwrap();
        let ctx = Context::open(&settings(dir.path(), "sqlite")).unwrap();
        ctx.locks.acquire(9, &TaskId::from("holder")).unwrap();

        cmd_lock(&ctx, LockCommands::Status { resource_id: 9 }, true).unwrap();
        cmd_lock(&ctx, LockCommands::Release { resource_id: 9 }, false).unwrap();
        assert!(!ctx.locks.is_locked(9));
        cmd_lock(&ctx, LockCommands::Purge, false).unwrap();
    }

    #[test]
    fn test_missing_task() {
        let dir = tempdir().unwrap();
        let ctx = Context::open(&settings(dir.path(), "sqlite")).unwrap();
        assert!(cmd_task(&ctx, "nope", false).is_err());
    }
}
