//! Resource lock snapshots.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{ResourceId, TaskId};

/// Current holder of a resource lease.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStatus {
    pub resource_id: ResourceId,
    pub task_id: TaskId,
    pub status: String,
    pub locked_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl LockStatus {
    pub const LOCKED: &'static str = "locked";

    /// Creates a held lock expiring `lease` after `now`.
    pub fn held(
        resource_id: ResourceId,
        task_id: TaskId,
        now: DateTime<Utc>,
        lease: chrono::Duration,
    ) -> Self {
        Self {
            resource_id,
            task_id,
            status: Self::LOCKED.to_string(),
            locked_at: now,
            expires_at: now + lease,
        }
    }

    /// A lease is expired once its deadline is at or before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
