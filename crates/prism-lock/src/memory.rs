//! In-process lock table.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use prism_models::{LockStatus, ResourceId, TaskId};
use tracing::{debug, info};

use crate::config::lease_delta;
use crate::error::{LockError, Result};
use crate::manager::LockManager;

/// Lock manager holding its table in memory.
///
/// One mutex guards the whole check-expired-then-insert sequence.
pub struct MemoryLockManager {
    locks: Mutex<HashMap<ResourceId, LockStatus>>,
    lease: chrono::Duration,
}

impl MemoryLockManager {
    pub fn new(lease: Duration) -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
            lease: lease_delta(lease),
        }
    }

    fn table(&self) -> Result<MutexGuard<'_, HashMap<ResourceId, LockStatus>>> {
        self.locks
            .lock()
            .map_err(|e| LockError::LockPoisoned(e.to_string()))
    }
}

impl Default for MemoryLockManager {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_LEASE)
    }
}

impl LockManager for MemoryLockManager {
    fn acquire(&self, resource_id: ResourceId, task_id: &TaskId) -> Result<()> {
        let now = Utc::now();
        let mut locks = self.table()?;

        if let Some(existing) = locks.get(&resource_id) {
            if !existing.is_expired(now) {
                return Err(LockError::Conflict {
                    resource_id,
                    holder: existing.task_id.clone(),
                });
            }
            debug!(resource_id, previous = %existing.task_id, "Reclaiming expired lock");
        }

        locks.insert(
            resource_id,
            LockStatus::held(resource_id, task_id.clone(), now, self.lease),
        );
        info!(resource_id, task_id = %task_id, "Lock acquired");
        Ok(())
    }

    fn release(&self, resource_id: ResourceId) -> Result<()> {
        if self.table()?.remove(&resource_id).is_some() {
            info!(resource_id, "Lock released");
        }
        Ok(())
    }

    fn status(&self, resource_id: ResourceId) -> Result<Option<LockStatus>> {
        let now = Utc::now();
        Ok(self
            .table()?
            .get(&resource_id)
            .filter(|lock| !lock.is_expired(now))
            .cloned())
    }

    fn extend(&self, resource_id: ResourceId) -> Result<bool> {
        let now = Utc::now();
        let mut locks = self.table()?;
        match locks.get_mut(&resource_id) {
            Some(lock) if !lock.is_expired(now) => {
                lock.expires_at = now + self.lease;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn purge_expired(&self) -> Result<usize> {
        let now = Utc::now();
        let mut locks = self.table()?;
        let before = locks.len();
        locks.retain(|_, lock| !lock.is_expired(now));
        Ok(before - locks.len())
    }
}
