//! Terraform executor configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use prism_runtime::DEFAULT_TIMEOUT;

use crate::error::{ExecutorError, Result};

/// Settings for [`TerraformExecutor`](crate::TerraformExecutor).
#[derive(Debug, Clone)]
pub struct TerraformConfig {
    /// Terraform binary, resolved through `PATH` when relative.
    pub binary: PathBuf,
    /// Root under which per-task workspaces are allocated.
    pub base_path: PathBuf,
    /// Deadline for each terraform invocation.
    pub timeout: Duration,
    /// Remove allocated workspaces once the task finishes.
    pub clean_workspace: bool,
    /// Extra attributes read from the state after `apply`, name to dotted path.
    pub attribute_queries: BTreeMap<String, String>,
    /// Extra environment for every terraform process.
    pub env: Vec<(String, String)>,
}

impl Default for TerraformConfig {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("terraform"),
            base_path: std::env::temp_dir().join("prism").join("workspaces"),
            timeout: DEFAULT_TIMEOUT,
            clean_workspace: true,
            attribute_queries: BTreeMap::new(),
            env: Vec::new(),
        }
    }
}

impl TerraformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = binary.into();
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = base_path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_clean_workspace(mut self, clean: bool) -> Self {
        self.clean_workspace = clean;
        self
    }

    pub fn with_attribute_query(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.attribute_queries.insert(name.into(), path.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.binary.as_os_str().is_empty() {
            return Err(ExecutorError::Configuration(
                "terraform binary must not be empty".to_string(),
            ));
        }
        if self.base_path.as_os_str().is_empty() {
            return Err(ExecutorError::Configuration(
                "workspace base path must not be empty".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(ExecutorError::Configuration(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if let Some((name, _)) = self
            .attribute_queries
            .iter()
            .find(|(name, path)| name.is_empty() || path.is_empty())
        {
            return Err(ExecutorError::Configuration(format!(
                "attribute query {:?} needs a name and a path",
                name
            )));
        }
        Ok(())
    }
}
