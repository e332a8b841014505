//! Process supervision and workspace allocation for Prism.
//!
//! - [`CommandRunner`] runs one external command in its own process group
//!   with a hard deadline and cooperative cancellation, streaming merged
//!   stdout/stderr lines to a callback.
//! - [`WorkspaceAllocator`] hands out isolated working directories.
//! - [`strip_ansi`] removes terminal styling from captured output.
//!
//! # Example
//!
//! ```no_run
//! use prism_runtime::CommandRunner;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn demo() {
//! let runner = CommandRunner::with_timeout(Duration::from_secs(60));
//! let args = vec!["terraform".to_string(), "version".to_string()];
//! let result = runner
//!     .run_streaming(&args, &CancellationToken::new(), |line| println!("{}", line))
//!     .await;
//! println!("exit {}", result.exit_code);
//! # }
//! ```

pub mod ansi;
pub mod config;
pub mod error;
pub mod runner;
pub mod workspace;

pub use ansi::strip_ansi;
pub use config::{RunnerConfig, DEFAULT_TIMEOUT};
pub use error::{Result, RunnerError, WorkspaceError};
pub use runner::{CommandResult, CommandRunner};
pub use workspace::WorkspaceAllocator;
