//! Configuration management for the backup sync engine.
//!
//! Loads built-in defaults, then an optional TOML file, then environment
//! variable overrides (`BACKUP_SYNC__SECTION__KEY`).

use crate::engine::retry::{RetryPolicy, MAX_RETRIES};
use crate::fs::walker::WalkOptions;
use crate::remote::RemoteRef;
use crate::utils::errors::BackupError;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix for environment overrides, e.g. `BACKUP_SYNC__SYNC__MAX_CONCURRENT=4`.
pub const ENV_PREFIX: &str = "BACKUP_SYNC";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub device: DeviceConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub repository: RepositoryConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Device identifier used to key the dedup cache
    pub id: String,

    /// Human readable device name
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Remote storage API base URL
    pub url: String,

    /// Bearer token
    pub token: String,

    /// Remote id of the device folder the backup root maps to
    pub root_folder_id: u64,

    /// Opaque id of the device folder, when the backend has one
    pub root_folder_uuid: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of nodes syncing at the same time
    pub max_concurrent: usize,

    /// Retries per node after the first attempt (capped at 3)
    pub max_retries: u8,

    /// Linear backoff unit in milliseconds
    pub backoff_unit_ms: u64,

    /// Follow symbolic links while walking
    pub follow_links: bool,

    /// File or directory names to skip
    pub exclude_patterns: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// SQLite file backing the dedup cache
    pub path: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Full,
    Compact,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (full, compact)
    pub format: LogFormat,

    /// Colored output
    pub ansi: bool,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "backup-device-01".to_string());
        Self {
            id: host.clone(),
            name: host,
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:3000".to_string(),
            token: String::new(),
            root_folder_id: 0,
            root_folder_uuid: None,
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            max_retries: MAX_RETRIES,
            backoff_unit_ms: 1000,
            follow_links: false,
            exclude_patterns: WalkOptions::default().exclude_patterns,
        }
    }
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/backup-sync/backup-sync.db"),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Full,
            ansi: true,
        }
    }
}

impl RemoteConfig {
    /// Remote reference of the folder the snapshot root maps to.
    pub fn root_ref(&self) -> RemoteRef {
        RemoteRef {
            id: self.root_folder_id,
            uuid: self.root_folder_uuid.clone(),
        }
    }
}

impl SyncConfig {
    pub fn walk_options(&self) -> WalkOptions {
        WalkOptions {
            follow_links: self.follow_links,
            max_depth: None,
            exclude_patterns: self.exclude_patterns.clone(),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.backoff_unit_ms))
    }
}

impl Config {
    /// Load configuration, layering an optional TOML file and the environment over defaults.
    pub fn load(path: Option<&Path>) -> Result<Self, BackupError> {
        let defaults = config::Config::try_from(&Config::default())?;
        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            if !path.exists() {
                return Err(BackupError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path).format(config::FileFormat::Toml));
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("sync.exclude_patterns"),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file only, without environment overrides.
    pub fn from_file(path: &Path) -> Result<Self, BackupError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config =
            toml::from_str(&content).map_err(|e| BackupError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Render the effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String, BackupError> {
        toml::to_string_pretty(self).map_err(|e| BackupError::Config(e.to_string()))
    }

    fn validate(&self) -> Result<(), BackupError> {
        if self.device.id.trim().is_empty() {
            return Err(BackupError::Config("device.id must not be empty".to_string()));
        }
        if self.sync.max_concurrent == 0 {
            return Err(BackupError::Config(
                "sync.max_concurrent must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
