//! SQLite-backed lock table.
//!
//! `acquire` is a single conditional upsert keyed on the `resource_id`
//! primary key. The row is only overwritten when the stored lease has
//! expired, so no separate delete/select/insert sequence is ever issued and
//! two processes racing on one file cannot both win.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use prism_models::{LockStatus, ResourceId, TaskId};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::config::lease_delta;
use crate::error::{LockError, Result};
use crate::manager::LockManager;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS execution_lock (
  resource_id INTEGER PRIMARY KEY,
  task_id TEXT NOT NULL,
  status TEXT NOT NULL,
  locked_at_ms INTEGER NOT NULL,
  expires_at_ms INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_execution_lock_expiry ON execution_lock(expires_at_ms);
"#;

const ACQUIRE: &str = r#"
INSERT INTO execution_lock (resource_id, task_id, status, locked_at_ms, expires_at_ms)
VALUES (?1, ?2, ?3, ?4, ?5)
ON CONFLICT(resource_id) DO UPDATE SET
  task_id = excluded.task_id,
  status = excluded.status,
  locked_at_ms = excluded.locked_at_ms,
  expires_at_ms = excluded.expires_at_ms
WHERE execution_lock.expires_at_ms <= excluded.locked_at_ms
"#;

/// Lock manager persisting leases in SQLite.
pub struct SqliteLockManager {
    conn: Mutex<Connection>,
    lease: chrono::Duration,
}

impl SqliteLockManager {
    /// Opens (or creates) the database and ensures the lock table exists.
    pub fn open(path: impl AsRef<Path>, lease: Duration) -> Result<Self> {
        Self::from_connection(Connection::open(path)?, lease)
    }

    pub fn open_in_memory(lease: Duration) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, lease)
    }

    fn from_connection(conn: Connection, lease: Duration) -> Result<Self> {
        conn.busy_timeout(Duration::from_secs(5))?;
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            lease: lease_delta(lease),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|e| LockError::LockPoisoned(e.to_string()))
    }
}

/// Creates the `execution_lock` table if missing.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    Ok(())
}

fn ms_to_dt(ms: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| LockError::InvalidData(format!("timestamp out of range: {}", ms)))
}

impl LockManager for SqliteLockManager {
    fn acquire(&self, resource_id: ResourceId, task_id: &TaskId) -> Result<()> {
        let now = Utc::now();
        let expires = now + self.lease;
        let conn = self.conn()?;

        let changed = conn.execute(
            ACQUIRE,
            params![
                resource_id,
                task_id.as_str(),
                LockStatus::LOCKED,
                now.timestamp_millis(),
                expires.timestamp_millis()
            ],
        )?;

        if changed == 0 {
            let holder: Option<String> = conn
                .query_row(
                    "SELECT task_id FROM execution_lock WHERE resource_id = ?1",
                    [resource_id],
                    |row| row.get(0),
                )
                .optional()?;
            debug!(resource_id, task_id = %task_id, "Lock acquisition refused");
            return Err(LockError::Conflict {
                resource_id,
                holder: TaskId::from(holder.unwrap_or_else(|| "unknown".to_string())),
            });
        }

        info!(resource_id, task_id = %task_id, "Lock acquired");
        Ok(())
    }

    fn release(&self, resource_id: ResourceId) -> Result<()> {
        let removed = self
            .conn()?
            .execute("DELETE FROM execution_lock WHERE resource_id = ?1", [resource_id])?;
        if removed > 0 {
            info!(resource_id, "Lock released");
        }
        Ok(())
    }

    fn status(&self, resource_id: ResourceId) -> Result<Option<LockStatus>> {
        let now = Utc::now().timestamp_millis();
        let row = self
            .conn()?
            .query_row(
                "SELECT task_id, status, locked_at_ms, expires_at_ms FROM execution_lock
                 WHERE resource_id = ?1 AND expires_at_ms > ?2",
                params![resource_id, now],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, i64>(3)?,
                    ))
                },
            )
            .optional()?;

        row.map(|(task_id, status, locked_at, expires_at)| {
            Ok(LockStatus {
                resource_id,
                task_id: TaskId::from(task_id),
                status,
                locked_at: ms_to_dt(locked_at)?,
                expires_at: ms_to_dt(expires_at)?,
            })
        })
        .transpose()
    }

    fn extend(&self, resource_id: ResourceId) -> Result<bool> {
        let now = Utc::now();
        let changed = self.conn()?.execute(
            "UPDATE execution_lock SET expires_at_ms = ?2
             WHERE resource_id = ?1 AND expires_at_ms > ?3",
            params![
                resource_id,
                (now + self.lease).timestamp_millis(),
                now.timestamp_millis()
            ],
        )?;
        Ok(changed > 0)
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now().timestamp_millis();
        let removed = self
            .conn()?
            .execute("DELETE FROM execution_lock WHERE expires_at_ms <= ?1", [now])?;
        if removed > 0 {
            debug!(removed, "Purged expired locks");
        }
        Ok(removed)
    }
}
