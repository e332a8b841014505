//! Hub configuration.

use crate::error::{HubError, Result};

/// Default per-observer queue capacity.
pub const DEFAULT_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Messages buffered per observer before new ones are dropped.
    pub capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

impl HubConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(HubError::Configuration("capacity must be non-zero".into()));
        }
        Ok(())
    }
}
