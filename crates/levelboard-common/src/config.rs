//! Configuration types for Levelboard
//!
//! This module defines the process configuration: where shards live, the
//! initial per-guild tuning, leaderboard paging limits and logging.

use crate::error::{Error, Result};
use crate::types::GuildId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root configuration for Levelboard
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Storage configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Initial values for newly created guild configs
    #[serde(default)]
    pub defaults: GuildDefaults,
    /// Leaderboard scan configuration
    #[serde(default)]
    pub leaderboard: LeaderboardConfig,
    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| Error::configuration(format!("invalid TOML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a file; a missing file yields the default configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    /// Reject values that would make shards unusable
    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.as_os_str().is_empty() {
            return Err(Error::configuration("storage.data_dir must not be empty"));
        }
        if self.defaults.min_xp_per_grant == 0 {
            return Err(Error::configuration("defaults.min_xp_per_grant must be > 0"));
        }
        if self.defaults.min_xp_per_grant > self.defaults.max_xp_per_grant {
            return Err(Error::configuration(format!(
                "defaults.min_xp_per_grant ({}) exceeds max_xp_per_grant ({})",
                self.defaults.min_xp_per_grant, self.defaults.max_xp_per_grant
            )));
        }
        if self.leaderboard.max_page_size == 0 {
            return Err(Error::configuration("leaderboard.max_page_size must be > 0"));
        }
        Ok(())
    }
}

/// Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding one database file per guild
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// File name prefix for shard databases
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl StorageConfig {
    /// Create config with data directory
    pub fn with_data_dir(data_dir: impl AsRef<Path>) -> Self {
        Self {
            data_dir: data_dir.as_ref().to_path_buf(),
            ..Default::default()
        }
    }

    /// Path of the database file backing a guild shard
    #[must_use]
    pub fn shard_path(&self, guild: GuildId) -> PathBuf {
        self.data_dir.join(format!("{}{}.redb", self.file_prefix, guild))
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

/// Initial per-guild tuning, copied into a guild's config on first open
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GuildDefaults {
    #[serde(default = "default_min_xp")]
    pub min_xp_per_grant: u32,
    #[serde(default = "default_max_xp")]
    pub max_xp_per_grant: u32,
    #[serde(default = "default_cooldown")]
    pub seconds_between_grants: u32,
    #[serde(default = "default_notification_level")]
    pub minimum_level_for_notification: u32,
}

impl Default for GuildDefaults {
    fn default() -> Self {
        Self {
            min_xp_per_grant: default_min_xp(),
            max_xp_per_grant: default_max_xp(),
            seconds_between_grants: default_cooldown(),
            minimum_level_for_notification: default_notification_level(),
        }
    }
}

/// Leaderboard scan configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LeaderboardConfig {
    /// Upper bound on entries returned by a single page walk
    #[serde(default = "default_max_page_size")]
    pub max_page_size: usize,
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            max_page_size: default_max_page_size(),
        }
    }
}

/// Logging configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./saves")
}

fn default_file_prefix() -> String {
    "guild_".to_string()
}

const fn default_min_xp() -> u32 {
    15
}

const fn default_max_xp() -> u32 {
    25
}

const fn default_cooldown() -> u32 {
    60
}

const fn default_notification_level() -> u32 {
    5
}

const fn default_max_page_size() -> usize {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}
