//! Background work configuration.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{AffinityError, Result};

/// Time slicing of a cancellable background operation.
///
/// ```toml
/// step_interval_ms = 100
/// steps = 100
/// ```
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct WorkConfig {
    /// Delay before each step; cancellation is checked while waiting.
    pub step_interval_ms: u64,
    pub steps: u32,
}

impl Default for WorkConfig {
    fn default() -> Self {
        Self {
            step_interval_ms: 100,
            steps: 100,
        }
    }
}

impl WorkConfig {
    pub fn step_interval(&self) -> Duration {
        Duration::from_millis(self.step_interval_ms)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps == 0 {
            return Err(AffinityError::Config("steps must be at least 1".into()));
        }
        if self.step_interval_ms == 0 {
            return Err(AffinityError::Config(
                "step_interval_ms must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
