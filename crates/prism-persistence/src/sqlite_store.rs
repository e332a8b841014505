//! SQLite task store.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prism_models::{Action, ExecutionTask, ResourceId, TaskId, TaskStatus};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tracing::debug;

use crate::error::{PersistenceError, Result};
use crate::task_store::{check_terminal, TaskStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS execution_task (
  task_id TEXT PRIMARY KEY,
  resource_id INTEGER NOT NULL,
  action TEXT NOT NULL,
  status TEXT NOT NULL,
  output TEXT NOT NULL DEFAULT '',
  error TEXT NOT NULL DEFAULT '',
  started_at_ms INTEGER NULL,
  finished_at_ms INTEGER NULL,
  duration_ms INTEGER NOT NULL DEFAULT 0,
  created_at_ms INTEGER NOT NULL,
  updated_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_execution_task_resource ON execution_task(resource_id, created_at_ms DESC);
CREATE INDEX IF NOT EXISTS idx_execution_task_status ON execution_task(status);
"#;

const COLUMNS: &str = "task_id, resource_id, action, status, output, error, \
     started_at_ms, finished_at_ms, duration_ms, created_at_ms, updated_at_ms";

/// Task store backed by a single SQLite database file.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    /// Opens (or creates) the database and ensures the schema exists.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| PersistenceError::LockPoisoned(e.to_string()))
    }

    fn query_tasks(&self, sql: &str, param: rusqlite::types::Value) -> Result<Vec<ExecutionTask>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map([param], |row| Ok(row_to_task(row)))?;
        let mut tasks = Vec::new();
        for row in rows {
            tasks.push(row??);
        }
        Ok(tasks)
    }
}

/// Creates the `execution_task` table and indexes if missing.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn dt_to_ms(dt: DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

fn ms_to_dt(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| PersistenceError::InvalidData(format!("timestamp out of range: {}", ms)))
}

fn row_to_task(row: &Row<'_>) -> Result<ExecutionTask> {
    let status: String = row.get(3)?;
    let started: Option<i64> = row.get(6)?;
    let finished: Option<i64> = row.get(7)?;
    Ok(ExecutionTask {
        task_id: TaskId::from(row.get::<_, String>(0)?),
        resource_id: row.get(1)?,
        action: Action::from(row.get::<_, String>(2)?),
        status: status.parse().map_err(PersistenceError::InvalidData)?,
        output: row.get(4)?,
        error: row.get(5)?,
        started_at: started.map(ms_to_dt).transpose()?,
        finished_at: finished.map(ms_to_dt).transpose()?,
        duration: row.get(8)?,
        created_at: ms_to_dt(row.get(9)?)?,
        updated_at: ms_to_dt(row.get(10)?)?,
    })
}

fn expect_one(changed: usize, task_id: &TaskId) -> Result<()> {
    if changed == 0 {
        Err(PersistenceError::NotFound(task_id.clone()))
    } else {
        Ok(())
    }
}

impl TaskStore for SqliteTaskStore {
    fn create(
        &self,
        task_id: &TaskId,
        resource_id: ResourceId,
        action: &Action,
    ) -> Result<ExecutionTask> {
        let task = ExecutionTask::new(task_id.clone(), resource_id, action.clone());
        let now = dt_to_ms(task.created_at);
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO execution_task (task_id, resource_id, action, status, created_at_ms, updated_at_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![task_id.as_str(), resource_id, action.as_str(), task.status.as_str(), now],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(PersistenceError::AlreadyExists(task_id.clone()))
            }
            Err(e) => return Err(e.into()),
        }
        debug!(task_id = %task_id, resource_id, action = %action, "Created task record");
        Ok(task)
    }

    fn get(&self, task_id: &TaskId) -> Result<ExecutionTask> {
        let conn = self.conn()?;
        let task = conn
            .query_row(
                &format!("SELECT {} FROM execution_task WHERE task_id = ?1", COLUMNS),
                [task_id.as_str()],
                |row| Ok(row_to_task(row)),
            )
            .optional()?;
        task.ok_or_else(|| PersistenceError::NotFound(task_id.clone()))?
    }

    fn start(&self, task_id: &TaskId) -> Result<()> {
        let now = dt_to_ms(Utc::now());
        let changed = self.conn()?.execute(
            "UPDATE execution_task SET status = ?2, started_at_ms = ?3, updated_at_ms = ?3
             WHERE task_id = ?1",
            params![task_id.as_str(), TaskStatus::Running.as_str(), now],
        )?;
        expect_one(changed, task_id)
    }

    fn finish(
        &self,
        task_id: &TaskId,
        status: TaskStatus,
        output: &str,
        error: &str,
    ) -> Result<()> {
        check_terminal(status)?;
        let now = dt_to_ms(Utc::now());
        let changed = self.conn()?.execute(
            "UPDATE execution_task SET status = ?2, output = ?3, error = ?4,
               finished_at_ms = ?5,
               duration_ms = CASE WHEN started_at_ms IS NULL THEN 0 ELSE ?5 - started_at_ms END,
               updated_at_ms = ?5
             WHERE task_id = ?1",
            params![task_id.as_str(), status.as_str(), output, error, now],
        )?;
        expect_one(changed, task_id)
    }

    fn reset(&self, task_id: &TaskId) -> Result<()> {
        let now = dt_to_ms(Utc::now());
        let changed = self.conn()?.execute(
            "UPDATE execution_task SET status = ?2, output = '', error = '',
               started_at_ms = NULL, finished_at_ms = NULL, duration_ms = 0, updated_at_ms = ?3
             WHERE task_id = ?1 AND status IN (?4, ?5)",
            params![
                task_id.as_str(),
                TaskStatus::Pending.as_str(),
                now,
                TaskStatus::Failed.as_str(),
                TaskStatus::Cancelled.as_str()
            ],
        )?;
        if changed == 0 {
            let task = self.get(task_id)?;
            return Err(PersistenceError::NotRetryable {
                task_id: task_id.clone(),
                status: task.status,
            });
        }
        Ok(())
    }

    fn list_by_resource(&self, resource_id: ResourceId) -> Result<Vec<ExecutionTask>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM execution_task WHERE resource_id = ?1
                 ORDER BY created_at_ms DESC, task_id DESC",
                COLUMNS
            ),
            resource_id.into(),
        )
    }

    fn list_failed(&self) -> Result<Vec<ExecutionTask>> {
        self.query_tasks(
            &format!(
                "SELECT {} FROM execution_task WHERE status = ?1
                 ORDER BY created_at_ms DESC, task_id DESC",
                COLUMNS
            ),
            TaskStatus::Failed.as_str().to_string().into(),
        )
    }

    fn delete(&self, task_id: &TaskId) -> Result<()> {
        self.conn()?
            .execute("DELETE FROM execution_task WHERE task_id = ?1", [task_id.as_str()])?;
        Ok(())
    }
}
