//! Runtime settings resolved from the environment.
//!
//! | Variable | Default |
//! |---|---|
//! | `PRISM_TERRAFORM_BIN` | `terraform` found on `PATH` |
//! | `PRISM_LOCK_BACKEND` | `sqlite` (`memory` for a single process) |
//! | `PRISM_STORE_BACKEND` | `sqlite` (`file` keeps JSON records) |
//! | `PRISM_LOCK_LEASE_SECS` | 1800 |
//! | `PRISM_TIMEOUT_SECS` | 1800 |
//! | `PRISM_KEEP_WORKSPACES` | unset |
//! | `PRISM_HUB_CAPACITY` | 256 |

use std::path::{Path, PathBuf};
use std::time::Duration;

use prism_events::DEFAULT_CAPACITY;
use prism_lock::DEFAULT_LEASE;
use thiserror::Error;
use tracing::debug;

const DATABASE_FILE: &str = "prism.db";

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("invalid value for {key}: '{value}'")]
    InvalidValue { key: &'static str, value: String },

    #[error("terraform not found on PATH; set PRISM_TERRAFORM_BIN")]
    TerraformNotFound,
}

/// Where task history is kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreKind {
    Sqlite,
    File,
}

/// Where resource locks are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    Sqlite,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub state_dir: PathBuf,
    /// `None` when neither configured nor found on `PATH`.
    pub terraform_bin: Option<PathBuf>,
    pub store: StoreKind,
    pub locks: LockKind,
    pub lock_lease: Duration,
    pub timeout: Duration,
    pub keep_workspaces: bool,
    pub hub_capacity: usize,
}

impl Settings {
    /// Reads settings from the process environment.
    pub fn from_env(state_dir: PathBuf) -> Result<Self, SettingsError> {
        Self::from_lookup(state_dir, |key| std::env::var(key).ok())
    }

    /// Reads settings through `lookup`.
    pub fn from_lookup<F>(state_dir: PathBuf, lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let terraform_bin = get("PRISM_TERRAFORM_BIN")
            .map(PathBuf::from)
            .or_else(|| which::which("terraform").ok());

        let store = match get("PRISM_STORE_BACKEND").as_deref() {
            None | Some("sqlite") => StoreKind::Sqlite,
            Some("file") => StoreKind::File,
            Some(other) => {
                return Err(SettingsError::InvalidValue {
                    key: "PRISM_STORE_BACKEND",
                    value: other.to_string(),
                })
            }
        };
        let locks = match get("PRISM_LOCK_BACKEND").as_deref() {
            None | Some("sqlite") => LockKind::Sqlite,
            Some("memory") => LockKind::Memory,
            Some(other) => {
                return Err(SettingsError::InvalidValue {
                    key: "PRISM_LOCK_BACKEND",
                    value: other.to_string(),
                })
            }
        };

        let settings = Self {
            lock_lease: seconds(get("PRISM_LOCK_LEASE_SECS"), "PRISM_LOCK_LEASE_SECS")?
                .unwrap_or(DEFAULT_LEASE),
            timeout: seconds(get("PRISM_TIMEOUT_SECS"), "PRISM_TIMEOUT_SECS")?
                .unwrap_or(prism_executor::TerraformConfig::default().timeout),
            keep_workspaces: get("PRISM_KEEP_WORKSPACES")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            hub_capacity: match get("PRISM_HUB_CAPACITY") {
                Some(v) => v.trim().parse().map_err(|_| SettingsError::InvalidValue {
                    key: "PRISM_HUB_CAPACITY",
                    value: v,
                })?,
                None => DEFAULT_CAPACITY,
            },
            state_dir,
            terraform_bin,
            store,
            locks,
        };
        debug!(?settings, "Resolved settings");
        Ok(settings)
    }

    /// The terraform binary, required only by commands that execute.
    pub fn terraform_bin(&self) -> Result<&Path, SettingsError> {
        self.terraform_bin
            .as_deref()
            .ok_or(SettingsError::TerraformNotFound)
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join(DATABASE_FILE)
    }

    pub fn workspaces_dir(&self) -> PathBuf {
        self.state_dir.join("workspaces")
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}

fn seconds(value: Option<String>, key: &'static str) -> Result<Option<Duration>, SettingsError> {
    match value {
        None => Ok(None),
        Some(v) => match v.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => Ok(Some(Duration::from_secs(secs))),
            _ => Err(SettingsError::InvalidValue { key, value: v }),
        },
    }
}
