//! Server configuration
//!
//! Read from an optional TOML file; CLI flags and environment variables
//! override individual fields in the binary.

use crate::error::CoreError;
use crate::ledger::DEFAULT_BILLING_INCREMENT_SECONDS;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Long-poll timeout window (milliseconds)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LongPollConfig {
    /// Used when the client sends no timeout
    pub default_timeout_ms: u64,
    pub min_timeout_ms: u64,
    pub max_timeout_ms: u64,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 25_000,
            min_timeout_ms: 1_000,
            max_timeout_ms: 30_000,
        }
    }
}

/// Top-level configuration for a rolecall server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterConfig {
    /// JSON document holding users, orgs, sessions and global config
    pub data_path: PathBuf,

    /// Billing granularity; usage is rounded down to a multiple of this
    pub billing_increment_seconds: i64,

    pub long_poll: LongPollConfig,

    pub bind_address: String,

    pub port: u16,
}

impl Default for MeterConfig {
    fn default() -> Self {
        Self {
            data_path: default_data_dir().join("rolecall.json"),
            billing_increment_seconds: DEFAULT_BILLING_INCREMENT_SECONDS,
            long_poll: LongPollConfig::default(),
            bind_address: "127.0.0.1".to_string(),
            port: 3340,
        }
    }
}

/// `<data dir>/rolecall`, or the working directory when the platform has none
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("rolecall"))
        .unwrap_or_else(|| PathBuf::from("."))
}

impl MeterConfig {
    /// Parse a TOML config file; missing keys keep their defaults
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::FileRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| CoreError::InvalidConfig {
            message: format!("{}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.billing_increment_seconds <= 0 {
            return Err(CoreError::InvalidConfig {
                message: "billing_increment_seconds must be positive".to_string(),
            });
        }
        let lp = &self.long_poll;
        if lp.min_timeout_ms == 0 || lp.min_timeout_ms > lp.max_timeout_ms {
            return Err(CoreError::InvalidConfig {
                message: format!(
                    "long_poll timeouts out of order: min {} max {}",
                    lp.min_timeout_ms, lp.max_timeout_ms
                ),
            });
        }
        Ok(())
    }
}
