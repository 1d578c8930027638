//! Configuration management (ttdlog.toml)
//!
//! Handles loading and providing defaults for recording, snapshot and
//! debugger settings. Settings are stored in TOML format; every field has a
//! default so partial files are valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::event::DEFAULT_BLOCK_CAPACITY;

/// File name of the emitted log inside the log directory
pub const LOG_FILE_NAME: &str = "ttdlog.bin";

/// Event log configuration.
///
/// Contains all user-configurable settings organized into sections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TtdConfig {
    /// Snapshot cadence and retention
    #[serde(default)]
    pub snapshot: SnapshotConfig,
    /// Event storage and emission
    #[serde(default)]
    pub log: LogConfig,
    /// Debugger behavior
    #[serde(default)]
    pub debugger: DebuggerConfig,
}

/// Snapshot configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotConfig {
    /// Elapsed script execution time between snapshots in seconds (default: 2.0)
    #[serde(default = "default_snapshot_interval")]
    pub interval_secs: f64,
    /// Number of snapshots kept before older history is pruned (default: 2)
    #[serde(default = "default_history_length")]
    pub history_length: usize,
    /// Take ready-to-run snapshots of top-level calls during replay (default: false)
    #[serde(default)]
    pub ready_to_run: bool,
}

/// Event storage configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Entries per storage block (default: 4096)
    #[serde(default = "default_block_capacity")]
    pub block_capacity: usize,
    /// Directory the log is emitted to (default: platform data directory)
    #[serde(default)]
    pub directory: Option<PathBuf>,
    /// Write the log when a recording session ends (default: true)
    #[serde(default = "default_true")]
    pub emit_on_exit: bool,
    /// LZ4-compress the emitted log body (default: true)
    #[serde(default = "default_true")]
    pub compress: bool,
}

/// Debugger configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DebuggerConfig {
    /// Break when the first user function is entered (default: false)
    #[serde(default)]
    pub break_on_first_user_code: bool,
    /// Restrict stepping and position queries to just-my-code functions (default: false)
    #[serde(default)]
    pub just_my_code: bool,
}

fn default_snapshot_interval() -> f64 {
    2.0
}
fn default_history_length() -> usize {
    2
}
fn default_block_capacity() -> usize {
    DEFAULT_BLOCK_CAPACITY
}
fn default_true() -> bool {
    true
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_snapshot_interval(),
            history_length: default_history_length(),
            ready_to_run: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            block_capacity: default_block_capacity(),
            directory: None,
            emit_on_exit: default_true(),
            compress: default_true(),
        }
    }
}

/// Error loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl TtdConfig {
    /// Parse configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from the platform config directory, falling back to defaults
    pub fn load_or_default() -> Self {
        config_dir()
            .and_then(|dir| std::fs::read_to_string(dir.join("ttdlog.toml")).ok())
            .and_then(|content| toml::from_str(&content).ok())
            .unwrap_or_default()
    }

    /// Serialize to pretty TOML
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    /// Directory the log is emitted to, resolving the platform default
    pub fn log_directory(&self) -> Option<PathBuf> {
        self.log.directory.clone().or_else(data_dir)
    }

    /// Full path of the emitted log file
    pub fn log_path(&self) -> Option<PathBuf> {
        self.log_directory().map(|dir| dir.join(LOG_FILE_NAME))
    }

    /// Check for settings that cannot work and return warnings for each
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if self.log.block_capacity == 0 {
            warnings.push("log.block_capacity must be at least 1".to_string());
        }
        if self.snapshot.history_length == 0 {
            warnings.push("snapshot.history_length must be at least 1".to_string());
        }
        if !(self.snapshot.interval_secs.is_finite() && self.snapshot.interval_secs >= 0.0) {
            warnings.push(format!(
                "snapshot.interval_secs '{}' must be a non-negative number",
                self.snapshot.interval_secs
            ));
        }
        warnings
    }
}

/// Returns the platform-specific configuration directory.
///
/// Returns `None` if the home directory cannot be determined.
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "ttdlog", "ttdlog")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Returns the platform-specific data directory where logs are emitted.
pub fn data_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("io", "ttdlog", "ttdlog")
        .map(|dirs| dirs.data_dir().join("logs"))
}
