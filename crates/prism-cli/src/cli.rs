//! Command-line interface definition using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

fn version_string() -> &'static str {
    static VERSION: std::sync::OnceLock<String> = std::sync::OnceLock::new();
    VERSION.get_or_init(|| {
        format!(
            "{} ({}, {})",
            env!("CARGO_PKG_VERSION"),
            env!("PRISM_GIT_HASH"),
            env!("PRISM_BUILD_DATE")
        )
    })
}

/// Prism - run Terraform actions with locking, history and live output
#[derive(Parser, Debug)]
#[command(name = "prism")]
#[command(author, version = version_string(), about, long_about = None)]
pub struct Cli {
    /// Enable verbose output (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Path to state directory
    #[arg(short, long, env = "PRISM_STATE_DIR", global = true)]
    pub state_dir: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Inputs shared by `run` and `retry`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct RunInputs {
    /// Use this directory instead of allocating a workspace
    #[arg(long)]
    pub workdir: Option<PathBuf>,

    /// Terraform configuration written into the workspace
    #[arg(long)]
    pub config_file: Option<PathBuf>,

    /// Variable passed as `-var key=value` (repeatable)
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Per-invocation deadline in seconds
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run an action against a resource
    Run {
        /// Resource identifier
        resource_id: i64,

        /// init, plan, apply or destroy
        action: String,

        /// Task id (generated when omitted)
        #[arg(long)]
        task_id: Option<String>,

        #[command(flatten)]
        inputs: RunInputs,
    },

    /// Re-run a failed or cancelled task
    Retry {
        task_id: String,

        #[command(flatten)]
        inputs: RunInputs,
    },

    /// Show a task record
    Task { task_id: String },

    /// List tasks of a resource, newest first
    History { resource_id: i64 },

    /// List failed tasks, newest first
    Failed,

    /// Inspect or manage resource locks
    Lock {
        #[command(subcommand)]
        command: LockCommands,
    },

    /// Create database tables ahead of the first run
    Migrate,
}

#[derive(Subcommand, Debug)]
pub enum LockCommands {
    /// Show who holds a resource lock
    Status { resource_id: i64 },

    /// Forcibly release a resource lock
    Release { resource_id: i64 },

    /// Remove expired leases
    Purge,
}

/// Parses `KEY=VALUE`. The value may itself contain `=`.
pub fn parse_var(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", s)),
    }
}

impl Cli {
    /// Returns the state directory path, using default if not specified.
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .map(|h| h.join(".prism"))
                .unwrap_or_else(|| PathBuf::from(".prism"))
        })
    }

    /// Returns the log level based on verbosity.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from([
            "prism",
            "run",
            "42",
            "apply",
            "--task-id",
            "t-1",
            "--workdir",
            "/tmp/ws",
            "--var",
            "env=prod",
            "--var",
            "tags=a=b",
            "--json",
        ]);
        assert!(cli.json);
        match cli.command {
            Commands::Run {
                resource_id,
                action,
                task_id,
                inputs,
            } => {
                assert_eq!(resource_id, 42);
                assert_eq!(action, "apply");
                assert_eq!(task_id.as_deref(), Some("t-1"));
                assert_eq!(inputs.workdir, Some(PathBuf::from("/tmp/ws")));
                assert_eq!(
                    inputs.vars,
                    vec![
                        ("env".to_string(), "prod".to_string()),
                        ("tags".to_string(), "a=b".to_string())
                    ]
                );
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_parse_lock_commands() {
        let cli = Cli::parse_from(["prism", "lock", "release", "7"]);
        assert!(matches!(
            cli.command,
            Commands::Lock {
                command: LockCommands::Release { resource_id: 7 }
            }
        ));

        let cli = Cli::parse_from(["prism", "-vv", "lock", "purge"]);
        assert_eq!(cli.log_level(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_parse_var() {
        assert_eq!(parse_var("a=1"), Ok(("a".into(), "1".into())));
        assert_eq!(parse_var("a="), Ok(("a".into(), "".into())));
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=1").is_err());
    }

    #[test]
    fn test_state_dir_override() {
        let cli = Cli::parse_from(["prism", "--state-dir", "/srv/prism", "migrate"]);
        assert_eq!(cli.state_dir(), PathBuf::from("/srv/prism"));
    }

    #[test]
    fn test_run_requires_action() {
        assert!(Cli::try_parse_from(["prism", "run", "42"]).is_err());
        assert!(Cli::try_parse_from(["prism", "run", "abc", "plan"]).is_err());
    }
}
