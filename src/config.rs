//! JSON-based application configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::processor::OutputLocation;
use crate::production::{LockRetry, WatcherOptions};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

fn default_filter() -> String {
    "*".to_string()
}

fn default_lock_retry_attempts() -> u32 {
    LockRetry::default().attempts
}

fn default_lock_retry_interval_ms() -> u64 {
    LockRetry::default().interval.as_millis() as u64
}

fn default_debounce_ms() -> u64 {
    200
}

/// Settings for one watch-transform-write pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    #[serde(default)]
    pub input_dir: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: Option<PathBuf>,
    #[serde(default)]
    pub rules_path: Option<PathBuf>,
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub recursive: bool,
    /// Replaces the input extension in output names; unset keeps the input file name
    #[serde(default)]
    pub output_extension: Option<String>,
    #[serde(default = "default_lock_retry_attempts")]
    pub lock_retry_attempts: u32,
    #[serde(default = "default_lock_retry_interval_ms")]
    pub lock_retry_interval_ms: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            input_dir: None,
            output_dir: None,
            rules_path: None,
            filter: default_filter(),
            recursive: false,
            output_extension: None,
            lock_retry_attempts: default_lock_retry_attempts(),
            lock_retry_interval_ms: default_lock_retry_interval_ms(),
            debounce_ms: default_debounce_ms(),
            log_dir: None,
        }
    }
}

/// Command-line values that take precedence over the config file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub input_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub rules_path: Option<PathBuf>,
    pub filter: Option<String>,
    pub recursive: bool,
    pub output_extension: Option<String>,
    pub log_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load settings from a JSON file; absent fields take their defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::debug!(path = %path.display(), "Config loaded");
        Ok(config)
    }

    pub fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(dir) = overrides.input_dir {
            self.input_dir = Some(dir);
        }
        if let Some(dir) = overrides.output_dir {
            self.output_dir = Some(dir);
        }
        if let Some(path) = overrides.rules_path {
            self.rules_path = Some(path);
        }
        if let Some(filter) = overrides.filter {
            self.filter = filter;
        }
        if overrides.recursive {
            self.recursive = true;
        }
        if let Some(extension) = overrides.output_extension {
            self.output_extension = Some(extension);
        }
        if let Some(dir) = overrides.log_dir {
            self.log_dir = Some(dir);
        }
    }

    /// Check that every required setting is present
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_dir.is_none() {
            return Err(ConfigError::Missing("input_dir"));
        }
        if self.output_dir.is_none() {
            return Err(ConfigError::Missing("output_dir"));
        }
        if self.rules_path.is_none() {
            return Err(ConfigError::Missing("rules_path"));
        }
        Ok(())
    }

    pub fn lock_retry(&self) -> LockRetry {
        LockRetry::new(
            self.lock_retry_attempts,
            Duration::from_millis(self.lock_retry_interval_ms),
        )
    }

    pub fn watcher_options(&self) -> Result<WatcherOptions, ConfigError> {
        let input_dir = self.input_dir.clone().ok_or(ConfigError::Missing("input_dir"))?;
        Ok(WatcherOptions::new(input_dir)
            .with_filter(self.filter.clone())
            .recursive(self.recursive)
            .with_lock_retry(self.lock_retry())
            .with_debounce(Duration::from_millis(self.debounce_ms)))
    }

    pub fn output_location(&self) -> Result<OutputLocation, ConfigError> {
        let output_dir = self.output_dir.clone().ok_or(ConfigError::Missing("output_dir"))?;
        let location = OutputLocation::new(output_dir);
        Ok(match &self.output_extension {
            Some(extension) => location.with_extension(extension.clone()),
            None => location,
        })
    }
}
