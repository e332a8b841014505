//! Lease-based resource locks for Prism.
//!
//! At most one task may operate on a resource at a time. A lock carries a
//! lease deadline so that a crashed holder never strands a resource: once
//! the deadline passes the entry counts as absent and the next
//! [`LockManager::acquire`] reclaims it.
//!
//! - [`MemoryLockManager`] keeps the table in process.
//! - [`SqliteLockManager`] shares the table through a database file.
//!
//! # Example
//!
//! ```
//! use prism_lock::{LockConfig, LockManager};
//! use prism_models::TaskId;
//!
//! let locks = LockConfig::default().open().unwrap();
//! locks.acquire(42, &TaskId::from("plan-1")).unwrap();
//! assert!(locks.acquire(42, &TaskId::from("plan-2")).is_err());
//! locks.release(42).unwrap();
//! ```

pub mod config;
pub mod error;
pub mod manager;
pub mod memory;
pub mod sqlite;

pub use config::{LockBackend, LockConfig, DEFAULT_LEASE};
pub use error::{LockError, Result};
pub use manager::LockManager;
pub use memory::MemoryLockManager;
pub use sqlite::SqliteLockManager;
