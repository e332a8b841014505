//! Core data models for Prism.
//!
//! This crate provides the data types shared by every part of the execution
//! engine: task records, execution requests and results, progress snapshots
//! and lock snapshots.

pub mod execution;
pub mod ids;
pub mod lock;
pub mod task;

pub use execution::{ErrorKind, ExecuteRequest, ExecuteResult, PlanSummary, Progress};
pub use ids::{ResourceId, TaskId};
pub use lock::LockStatus;
pub use task::{Action, ExecutionTask, TaskStatus};
