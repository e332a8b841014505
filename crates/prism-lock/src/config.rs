//! Lock manager configuration.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{LockError, Result};
use crate::manager::LockManager;
use crate::memory::MemoryLockManager;
use crate::sqlite::SqliteLockManager;

/// Default lease: 30 minutes.
pub const DEFAULT_LEASE: Duration = Duration::from_secs(30 * 60);

/// Where lock entries live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockBackend {
    /// Process-local table. Locks vanish with the process.
    Memory,
    /// SQLite database shared by every process that opens the same file.
    Sqlite(PathBuf),
}

/// Configuration for a lock manager.
#[derive(Debug, Clone)]
pub struct LockConfig {
    pub backend: LockBackend,
    /// How long an acquired lock stays valid without release.
    pub lease: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            backend: LockBackend::Memory,
            lease: DEFAULT_LEASE,
        }
    }
}

impl LockConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: LockBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    /// Checks the lease and backend settings.
    pub fn validate(&self) -> Result<()> {
        if self.lease.is_zero() {
            return Err(LockError::Configuration("lease must be non-zero".into()));
        }
        if let LockBackend::Sqlite(path) = &self.backend {
            if path.as_os_str().is_empty() {
                return Err(LockError::Configuration("sqlite path is empty".into()));
            }
        }
        Ok(())
    }

    /// Validates the config and constructs the selected backend.
    pub fn open(&self) -> Result<Arc<dyn LockManager>> {
        self.validate()?;
        Ok(match &self.backend {
            LockBackend::Memory => Arc::new(MemoryLockManager::new(self.lease)),
            LockBackend::Sqlite(path) => Arc::new(SqliteLockManager::open(path, self.lease)?),
        })
    }
}

/// Converts a lease to a calendar duration, saturating at one century.
pub(crate) fn lease_delta(lease: Duration) -> chrono::Duration {
    chrono::Duration::from_std(lease).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LockConfig::default();
        assert_eq!(config.backend, LockBackend::Memory);
        assert_eq!(config.lease, Duration::from_secs(1800));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = LockConfig::new()
            .with_backend(LockBackend::Sqlite(PathBuf::from("/tmp/locks.db")))
            .with_lease(Duration::from_secs(60));

        assert_eq!(config.lease, Duration::from_secs(60));
        assert!(matches!(config.backend, LockBackend::Sqlite(_)));
    }

    #[test]
    fn test_validate_rejects_zero_lease() {
        let config = LockConfig::new().with_lease(Duration::ZERO);
        assert!(matches!(config.validate(), Err(LockError::Configuration(_))));
        assert!(config.open().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_path() {
        let config = LockConfig::new().with_backend(LockBackend::Sqlite(PathBuf::new()));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_lease_delta_saturates() {
        assert_eq!(lease_delta(Duration::from_millis(50)).num_milliseconds(), 50);
        assert!(lease_delta(Duration::MAX) > chrono::Duration::weeks(52));
    }
}
