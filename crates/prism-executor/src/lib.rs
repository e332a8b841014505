//! Prism Executor - drives infrastructure tasks through Terraform.
//!
//! This crate provides:
//! - [`TaskStateMachine`]: the per-execution lifecycle
//! - [`classifier`]: typed parsing of terraform's `-json` output and state files
//! - [`Executor`]: the executor abstraction
//! - [`TerraformExecutor`]: lock, workspace, subprocess and persistence glue
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prism_events::BroadcastHub;
//! use prism_executor::{Executor, TerraformConfig, TerraformExecutor};
//! use prism_lock::MemoryLockManager;
//! use prism_models::ExecuteRequest;
//! use prism_persistence::FileTaskStore;
//!
//! # async fn run() -> prism_executor::Result<()> {
//! let executor = TerraformExecutor::new(
//!     TerraformConfig::new().with_base_path("/var/lib/prism/workspaces"),
//!     Arc::new(MemoryLockManager::default()),
//!     Arc::new(FileTaskStore::new("/var/lib/prism")),
//!     Arc::new(BroadcastHub::default()),
//! )?;
//!
//! let result = executor
//!     .execute(ExecuteRequest::new("task-1", 42, "plan").with_config(r#"{"terraform": {}}"#))
//!     .await?;
//! println!("{:?}: {:?}", result.status, result.plan);
//! # Ok(())
//! # }
//! ```

pub mod base;
pub mod classifier;
pub mod config;
pub mod error;
pub mod executor;
pub mod fsm;
pub mod terraform;

pub use base::BaseExecutor;
pub use classifier::{
    ChangeSummary, Diagnostic, Hook, ParseResult, Severity, StateDocument, TerraformMessage,
};
pub use config::TerraformConfig;
pub use error::{ExecutorError, Result};
pub use executor::Executor;
pub use fsm::{TaskEvent, TaskStateMachine, TRANSITIONS};
pub use terraform::TerraformExecutor;
