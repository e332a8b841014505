//! Runner configuration.

use std::time::Duration;

use crate::error::RunnerError;

/// Default deadline for one command: 30 minutes.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Configuration for a [`crate::CommandRunner`].
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Hard deadline per command. Zero means [`DEFAULT_TIMEOUT`].
    pub timeout: Duration,
    /// Extra environment variables for every spawned command.
    pub env: Vec<(String, String)>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            env: Vec::new(),
        }
    }
}

impl RunnerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Returns the timeout, substituting the default for zero.
    pub fn effective_timeout(&self) -> Duration {
        if self.timeout.is_zero() {
            DEFAULT_TIMEOUT
        } else {
            self.timeout
        }
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.timeout.is_zero() {
            return Err(RunnerError::Configuration("timeout must be non-zero".into()));
        }
        if let Some((key, _)) = self.env.iter().find(|(k, _)| k.is_empty() || k.contains('=')) {
            return Err(RunnerError::Configuration(format!(
                "invalid environment variable name: {:?}",
                key
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(1800));
        assert!(config.env.is_empty());
    }

    #[test]
    fn test_zero_timeout_uses_default() {
        let config = RunnerConfig::new().with_timeout(Duration::ZERO);
        assert_eq!(config.effective_timeout(), DEFAULT_TIMEOUT);

        let config = config.with_timeout(Duration::from_secs(5));
        assert_eq!(config.effective_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_validate_env_names() {
        assert!(RunnerConfig::new().with_env("TF_IN_AUTOMATION", "1").validate().is_ok());
        assert!(RunnerConfig::new().with_env("A=B", "1").validate().is_err());
        assert!(RunnerConfig::new().with_env("", "1").validate().is_err());
        assert!(RunnerConfig::new().with_timeout(Duration::ZERO).validate().is_err());
    }
}
