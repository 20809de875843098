//! Logger configuration loading

use crate::{retention, Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Log root used when `Path` is unset
pub const DEFAULT_LOG_DIR: &str = "./log";

/// Base file name used when `Name` is unset
pub const DEFAULT_BASE_NAME: &str = "log";

/// Directory retention used when `MaxDays` is unset or zero
pub const DEFAULT_RETENTION_DAYS: u64 = 28;

/// Logger configuration as read from a TOML file
///
/// Every key is optional. A missing key keeps its zero value and the
/// accessors below resolve the documented default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct Config {
    /// `"dev"` selects development sinks, anything else production sinks
    pub mode: String,

    /// Root directory for dated log directories
    pub path: PathBuf,

    /// Base name of the log files
    pub name: String,

    /// Age in days after which a log directory is swept
    pub max_days: u64,

    /// Name prefix a directory needs to be eligible for sweeping
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Per-file rotation limits
    pub rotation: RotationConfig,
}

/// Rotation limits shared by both sinks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct RotationConfig {
    /// Maximum size of one file in megabytes
    pub max_size: u64,

    /// Rotated files to keep, 0 keeps all
    pub max_backups: usize,

    /// Days to keep rotated files, 0 keeps them regardless of age
    pub max_age: u64,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_size: 500,
            max_backups: 3,
            max_age: 28,
        }
    }
}

/// Which family of sinks to build
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One verbose console sink shared by every level
    Dev,
    /// Rotating JSON files, general plus error-only
    Prod,
}

impl Config {
    /// Load and validate configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let mut config = Self::from_toml(&content)?;
        config.load_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults on any failure
    ///
    /// The failure is printed to stderr. The returned configuration still
    /// receives environment overrides.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("zlog: failed to load {}: {}", path.display(), e);
                let mut config = Self::default();
                config.load_env_overrides();
                config
            }
        }
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Load environment variable overrides
    pub fn load_env_overrides(&mut self) {
        if let Ok(mode) = std::env::var("ZLOG_MODE") {
            self.mode = mode;
        }

        if let Ok(dir) = std::env::var("ZLOG_PATH") {
            self.path = PathBuf::from(dir);
        }

        if let Ok(name) = std::env::var("ZLOG_NAME") {
            self.name = name;
        }

        if let Ok(days) = std::env::var("ZLOG_MAX_DAYS") {
            self.max_days = days.trim().parse().unwrap_or(self.max_days);
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.rotation.max_size == 0 {
            return Err(Error::Config {
                message: "Rotation.MaxSize must be greater than 0".to_string(),
            });
        }

        if matches!(self.prefix.as_deref(), Some("")) {
            return Err(Error::Config {
                message: "Prefix must not be empty".to_string(),
            });
        }

        Ok(())
    }

    pub fn mode(&self) -> Mode {
        if self.mode == "dev" {
            Mode::Dev
        } else {
            Mode::Prod
        }
    }

    /// Root directory for dated log directories
    pub fn log_dir(&self) -> PathBuf {
        if self.path.as_os_str().is_empty() {
            PathBuf::from(DEFAULT_LOG_DIR)
        } else {
            self.path.clone()
        }
    }

    /// Base name of the log files
    pub fn base_name(&self) -> &str {
        if self.name.is_empty() {
            DEFAULT_BASE_NAME
        } else {
            &self.name
        }
    }

    /// Retention threshold in days
    pub fn retention_days(&self) -> u64 {
        if self.max_days == 0 {
            DEFAULT_RETENTION_DAYS
        } else {
            self.max_days
        }
    }

    /// Prefix a directory name needs to be swept
    ///
    /// Defaults to the base name of the log root. `None` when neither is
    /// available, in which case nothing is eligible.
    pub fn sweep_prefix(&self) -> Option<String> {
        match &self.prefix {
            Some(prefix) if !prefix.is_empty() => Some(prefix.clone()),
            _ => retention::default_prefix(&self.log_dir()),
        }
    }
}

/// Removes an environment variable when dropped, so a failing test
/// cannot leak it into later ones
#[cfg(test)]
pub(crate) struct EnvGuard(&'static str);

#[cfg(test)]
impl EnvGuard {
    pub(crate) fn set(key: &'static str, value: impl AsRef<std::ffi::OsStr>) -> Self {
        std::env::set_var(key, value);
        Self(key)
    }
}

#[cfg(test)]
impl Drop for EnvGuard {
    fn drop(&mut self) {
        std::env::remove_var(self.0);
    }
}
