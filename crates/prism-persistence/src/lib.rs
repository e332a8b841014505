//! Task history persistence for Prism.
//!
//! The orchestrator records every execution through the [`TaskStore`]
//! contract. Two backends are provided:
//!
//! - [`FileTaskStore`]: one crash-safe JSON file per task (write to a temp
//!   file, then rename).
//! - [`SqliteTaskStore`]: a single SQLite database, safe to share between
//!   processes.
//!
//! # Example
//!
//! ```no_run
//! use prism_models::{Action, TaskId};
//! use prism_persistence::{FileTaskStore, TaskStore};
//!
//! let store = FileTaskStore::new("/var/lib/prism");
//! let id = TaskId::from("plan-1");
//!
//! store.create(&id, 42, &Action::Plan).unwrap();
//! store.start(&id).unwrap();
//! store.complete(&id, true, "", "").unwrap();
//! assert!(!store.can_retry(&id).unwrap());
//! ```

pub mod atomic;
pub mod error;
pub mod file_store;
pub mod sqlite_store;
pub mod task_store;

pub use error::{PersistenceError, Result};
pub use file_store::FileTaskStore;
pub use sqlite_store::SqliteTaskStore;
pub use task_store::TaskStore;
