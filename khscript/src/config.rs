//! Engine configuration.
//!
//! A small JSON settings file controls the scheduler and the resource
//! guard. Every field has a default, so a missing or partial file still
//! yields a usable configuration.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::guard::{GuardOverrides, Strictness};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Runnable scripts advanced per host tick.
    pub max_scripts_per_tick: usize,
    /// Seconds a stopped or errored task stays visible before collection.
    pub stopped_retention_secs: u64,
    pub guard_strictness: Strictness,
    pub guard_overrides: GuardOverrides,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_scripts_per_tick: 10,
            stopped_retention_secs: 300,
            guard_strictness: Strictness::default(),
            guard_overrides: GuardOverrides::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(Self::from_json(&text)?)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let text = serde_json::to_string_pretty(self).map_err(ConfigError::Parse)?;
        fs::write(path, text)?;
        Ok(())
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.stopped_retention_secs)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
