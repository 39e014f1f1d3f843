//! TOML daemon configuration.
//!
//! Read from `$WEBTIME_CONFIG` or `~/.config/webtime/config.toml`. Every
//! field has a default, so a missing file is a valid configuration.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::engine::{AlarmSchedule, EngineConfig, DEFAULT_BLOCK_PAGE_URL, DEFAULT_SLEEP_GAP_SECS};

pub const CONFIG_ENV: &str = "WEBTIME_CONFIG";
pub const SOCKET_ENV: &str = "WEBTIME_SOCKET";
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/webtime.sock";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub flush_interval_secs: u64,
    pub rules_interval_secs: u64,
    pub reminder_interval_secs: u64,
    pub rollover_check_interval_secs: u64,
    /// Handed to hosts in the handshake.
    pub idle_threshold_secs: u64,
    pub sleep_gap_secs: u64,
    pub block_page_url: String,
    pub database_path: PathBuf,
    pub socket_path: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            flush_interval_secs: 10,
            rules_interval_secs: 60,
            reminder_interval_secs: 30,
            rollover_check_interval_secs: 30,
            idle_threshold_secs: 900,
            sleep_gap_secs: DEFAULT_SLEEP_GAP_SECS,
            block_page_url: DEFAULT_BLOCK_PAGE_URL.to_string(),
            database_path: default_database_path(),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
        }
    }
}

fn default_database_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("webtime")
        .join("webtime.db")
}

/// Location the daemon reads its configuration from.
pub fn config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_ENV) {
        return PathBuf::from(path);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("webtime")
        .join("config.toml")
}

impl DaemonConfig {
    /// Loads from [`config_path`], applying the socket environment override.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_from(&config_path())?;
        if let Ok(socket) = env::var(SOCKET_ENV) {
            config.socket_path = PathBuf::from(socket);
        }
        config.validate()?;
        Ok(config)
    }

    /// Reads one file; a missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let intervals = [
            ("flush_interval_secs", self.flush_interval_secs),
            ("rules_interval_secs", self.rules_interval_secs),
            ("reminder_interval_secs", self.reminder_interval_secs),
            ("rollover_check_interval_secs", self.rollover_check_interval_secs),
            ("idle_threshold_secs", self.idle_threshold_secs),
            ("sleep_gap_secs", self.sleep_gap_secs),
        ];
        for (field, value) in intervals {
            if value == 0 {
                return Err(ConfigError::Invalid {
                    field,
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        // Otherwise every periodic flush would look like a suspend.
        if self.sleep_gap_secs <= self.flush_interval_secs {
            return Err(ConfigError::Invalid {
                field: "sleep_gap_secs",
                reason: format!(
                    "must be greater than flush_interval_secs ({})",
                    self.flush_interval_secs
                ),
            });
        }
        if self.block_page_url.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "block_page_url",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            sleep_gap_secs: self.sleep_gap_secs,
            block_page_url: self.block_page_url.clone(),
        }
    }

    pub fn alarms(&self) -> AlarmSchedule {
        AlarmSchedule {
            flush: Duration::from_secs(self.flush_interval_secs),
            rules: Duration::from_secs(self.rules_interval_secs),
            reminders: Duration::from_secs(self.reminder_interval_secs),
            day_check: Duration::from_secs(self.rollover_check_interval_secs),
        }
    }
}
