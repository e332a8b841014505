//! The lock manager contract.

use prism_models::{LockStatus, ResourceId, TaskId};

use crate::error::Result;

/// Grants exclusive, lease-based ownership of a resource to one task.
///
/// `acquire` is atomic per resource: two concurrent calls for the same
/// resource never both succeed. Expired entries count as absent and are
/// overwritten by the next `acquire`.
pub trait LockManager: Send + Sync {
    /// Takes the lock, or fails with [`crate::LockError::Conflict`] naming the holder.
    fn acquire(&self, resource_id: ResourceId, task_id: &TaskId) -> Result<()>;

    /// Removes the lock. Releasing an absent lock is not an error.
    fn release(&self, resource_id: ResourceId) -> Result<()>;

    /// Returns the live lock, or `None` if absent or expired.
    fn status(&self, resource_id: ResourceId) -> Result<Option<LockStatus>>;

    /// Pushes the deadline of a live lock one lease forward.
    /// Returns false if there is no live lock.
    fn extend(&self, resource_id: ResourceId) -> Result<bool>;

    /// Deletes every expired entry and returns how many were removed.
    fn purge_expired(&self) -> Result<usize>;

    /// True iff a lock exists whose deadline is strictly in the future.
    fn is_locked(&self, resource_id: ResourceId) -> bool {
        match self.status(resource_id) {
            Ok(status) => status.is_some(),
            Err(e) => {
                tracing::warn!(resource_id, error = %e, "Lock status lookup failed");
                false
            }
        }
    }
}

/// Behaviour both backends must share.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;
    use crate::error::LockError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    pub fn conflict_names_holder(locks: &dyn LockManager) {
        locks.acquire(1, &TaskId::from("A")).unwrap();

        let err = locks.acquire(1, &TaskId::from("B")).unwrap_err();
        assert_eq!(err.holder().map(TaskId::as_str), Some("A"));
        assert_eq!(err.to_string(), "resource 1 is locked by task A");

        locks.release(1).unwrap();
        locks.acquire(1, &TaskId::from("B")).unwrap();
        assert_eq!(locks.status(1).unwrap().unwrap().task_id.as_str(), "B");
    }

    pub fn release_is_idempotent(locks: &dyn LockManager) {
        locks.release(99).unwrap();
        locks.acquire(99, &TaskId::from("A")).unwrap();
        locks.release(99).unwrap();
        locks.release(99).unwrap();
        assert!(!locks.is_locked(99));
        assert!(locks.status(99).unwrap().is_none());
    }

    pub fn resources_are_independent(locks: &dyn LockManager) {
        locks.acquire(1, &TaskId::from("A")).unwrap();
        locks.acquire(2, &TaskId::from("B")).unwrap();
        assert!(locks.is_locked(1));
        assert!(locks.is_locked(2));
        assert!(!locks.is_locked(3));
    }

    /// Expects a manager built with a 50ms lease.
    pub fn lease_expires(locks: &dyn LockManager) {
        locks.acquire(1, &TaskId::from("A")).unwrap();
        assert!(locks.is_locked(1));
        let held = locks.status(1).unwrap().unwrap();
        assert_eq!(held.status, LockStatus::LOCKED);

        thread::sleep(Duration::from_millis(100));

        assert!(!locks.is_locked(1));
        assert!(locks.status(1).unwrap().is_none());
        locks.acquire(1, &TaskId::from("B")).unwrap();
        assert_eq!(locks.status(1).unwrap().unwrap().task_id.as_str(), "B");
    }

    /// Expects a manager built with a 50ms lease.
    pub fn purge_and_extend(locks: &dyn LockManager) {
        assert!(!locks.extend(5).unwrap());

        locks.acquire(5, &TaskId::from("A")).unwrap();
        locks.acquire(6, &TaskId::from("B")).unwrap();
        let before = locks.status(5).unwrap().unwrap().expires_at;
        thread::sleep(Duration::from_millis(20));
        assert!(locks.extend(5).unwrap());
        assert!(locks.status(5).unwrap().unwrap().expires_at > before);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(locks.purge_expired().unwrap(), 2);
        assert_eq!(locks.purge_expired().unwrap(), 0);
        assert!(!locks.extend(5).unwrap());
    }

    /// Races `contenders` threads on one resource; exactly one must win.
    pub fn concurrent_acquire_single_winner(managers: Vec<Arc<dyn LockManager>>) {
        let contenders = managers.len();
        let barrier = Arc::new(Barrier::new(contenders));
        let wins = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = managers
            .into_iter()
            .enumerate()
            .map(|(n, locks)| {
                let barrier = Arc::clone(&barrier);
                let wins = Arc::clone(&wins);
                thread::spawn(move || {
                    barrier.wait();
                    match locks.acquire(7, &TaskId::from(format!("task-{}", n))) {
                        Ok(()) => {
                            wins.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(LockError::Conflict { .. }) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(wins.load(Ordering::SeqCst), 1);
    }
}
