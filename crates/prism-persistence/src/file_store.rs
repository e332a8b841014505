//! JSON file task store.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::Utc;
use prism_models::{Action, ExecutionTask, ResourceId, TaskId, TaskStatus};
use tracing::{debug, warn};

use crate::atomic::{atomic_write_json, ensure_dir, read_json_optional, remove_if_exists};
use crate::error::{PersistenceError, Result};
use crate::task_store::{check_terminal, newest_first, TaskStore};

/// Stores each task as its own JSON file:
/// ```text
/// base_path/
/// └── tasks/
///     ├── plan-1f3a.json
///     └── apply-9c2e.json
/// ```
///
/// Read-modify-write cycles are serialized within the process. Two processes
/// sharing one directory should use [`crate::SqliteTaskStore`] instead.
pub struct FileTaskStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileTaskStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    fn tasks_dir(&self) -> PathBuf {
        self.base_path.join("tasks")
    }

    fn task_path(&self, task_id: &TaskId) -> Result<PathBuf> {
        let id = task_id.as_str();
        if task_id.is_blank()
            || id == "."
            || id == ".."
            || id.contains(['/', '\\'])
        {
            return Err(PersistenceError::InvalidData(format!(
                "task id not usable as a file name: {:?}",
                id
            )));
        }
        Ok(self.tasks_dir().join(format!("{}.json", id)))
    }

    fn load(&self, path: &Path, task_id: &TaskId) -> Result<ExecutionTask> {
        read_json_optional(path)?.ok_or_else(|| PersistenceError::NotFound(task_id.clone()))
    }

    /// Applies `f` to a stored record and writes it back.
    fn update<F>(&self, task_id: &TaskId, f: F) -> Result<()>
    where
        F: FnOnce(&mut ExecutionTask),
    {
        let path = self.task_path(task_id)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| PersistenceError::LockPoisoned(e.to_string()))?;
        let mut task = self.load(&path, task_id)?;
        f(&mut task);
        atomic_write_json(&path, &task)
    }

    fn scan<P>(&self, predicate: P) -> Result<Vec<ExecutionTask>>
    where
        P: Fn(&ExecutionTask) -> bool,
    {
        let dir = self.tasks_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(PersistenceError::ReadError { path: dir, source }),
        };

        let mut tasks = Vec::new();
        for entry in entries {
            let path = entry
                .map_err(|source| PersistenceError::ReadError {
                    path: dir.clone(),
                    source,
                })?
                .path();
            if !path.extension().is_some_and(|ext| ext == "json") {
                continue;
            }
            match read_json_optional::<ExecutionTask>(&path) {
                Ok(Some(task)) if predicate(&task) => tasks.push(task),
                Ok(_) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable task record"),
            }
        }
        newest_first(&mut tasks);
        Ok(tasks)
    }
}

impl TaskStore for FileTaskStore {
    fn create(
        &self,
        task_id: &TaskId,
        resource_id: ResourceId,
        action: &Action,
    ) -> Result<ExecutionTask> {
        let path = self.task_path(task_id)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| PersistenceError::LockPoisoned(e.to_string()))?;
        if path.exists() {
            return Err(PersistenceError::AlreadyExists(task_id.clone()));
        }
        ensure_dir(&self.tasks_dir())?;

        let task = ExecutionTask::new(task_id.clone(), resource_id, action.clone());
        atomic_write_json(&path, &task)?;
        debug!(task_id = %task_id, resource_id, action = %action, "Created task record");
        Ok(task)
    }

    fn get(&self, task_id: &TaskId) -> Result<ExecutionTask> {
        let path = self.task_path(task_id)?;
        self.load(&path, task_id)
    }

    fn start(&self, task_id: &TaskId) -> Result<()> {
        self.update(task_id, |task| task.mark_started(Utc::now()))
    }

    fn finish(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        output: &str,
        error: &str,
    ) -> Result<()> {
        check_terminal(status)?;
        self.update(task_id, |task| {
            task.mark_finished(status, output, error, Utc::now())
        })
    }

    fn reset(&self, task_id: &TaskId) -> Result<()> {
        let path = self.task_path(task_id)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| PersistenceError::LockPoisoned(e.to_string()))?;
        let mut task = self.load(&path, task_id)?;
        if !task.is_retryable() {
            return Err(PersistenceError::NotRetryable {
                task_id: task_id.clone(),
                status: task.status,
            });
        }
        task.reset();
        atomic_write_json(&path, &task)
    }

    fn list_by_resource(&self, resource_id: ResourceId) -> Result<Vec<ExecutionTask>> {
        self.scan(|task| task.resource_id == resource_id)
    }

    fn list_failed(&self) -> Result<Vec<ExecutionTask>> {
        self.scan(|task| task.status == TaskStatus::Failed)
    }

    fn delete(&self, task_id: &TaskId) -> Result<()> {
        let path = self.task_path(task_id)?;
        let _guard = self
            .write_lock
            .lock()
            .map_err(|e| PersistenceError::LockPoisoned(e.to_string()))?;
        remove_if_exists(&path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task_store::conformance;
    use tempfile::tempdir;

    #[test]
    fn test_lifecycle() {
        let dir = tempdir().unwrap();
        conformance::lifecycle(&FileTaskStore::new(dir.path()));
    }

    #[test]
    fn test_cancel_then_reset() {
        let dir = tempdir().unwrap();
        conformance::cancel_then_reset(&FileTaskStore::new(dir.path()));
    }

    #[test]
    fn test_duplicate_create_fails() {
        let dir = tempdir().unwrap();
        conformance::duplicate_create_fails(&FileTaskStore::new(dir.path()));
    }

    #[test]
    fn test_listing() {
        let dir = tempdir().unwrap();
        conformance::listing(&FileTaskStore::new(dir.path()));
    }

    #[test]
    fn test_missing_task() {
        let dir = tempdir().unwrap();
        conformance::missing_task(&FileTaskStore::new(dir.path()));
    }

    #[test]
    fn test_rejects_path_like_ids() {
        let dir = tempdir().unwrap();
        let store = FileTaskStore::new(dir.path());

        let result = store.create(&TaskId::from("../escape"), 1, &Action::Plan);
        assert!(matches!(result, Err(PersistenceError::InvalidData(_))));
    }

    #[test]
    fn test_survives_reopen() {
        let dir = tempdir().unwrap();
        let id = TaskId::from("t-reopen");
        {
            let store = FileTaskStore::new(dir.path());
            store.create(&id, 3, &Action::Apply).unwrap();
            store.start(&id).unwrap();
        }

        let store = FileTaskStore::new(dir.path());
        let task = store.get(&id).unwrap();
        assert_eq!(task.status, TaskStatus::Running);
        assert_eq!(task.action, Action::Apply);
    }

    #[test]
    fn test_unreadable_record_is_skipped_in_listing() {
        let dir = tempdir().unwrap();
        let store = FileTaskStore::new(dir.path());
        store.create(&TaskId::from("good"), 5, &Action::Plan).unwrap();
        fs::write(dir.path().join("tasks/bad.json"), "{").unwrap();

        let tasks = store.list_by_resource(5).unwrap();
        assert_eq!(tasks.len(), 1);
    }
}
