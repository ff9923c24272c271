//! Executor configuration for cexec
//!
//! Located at `~/.config/cexec/config.toml` unless a path is given explicitly.

use crate::{ConfigError, LoggingConfig, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level executor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub runtime: RuntimeConfig,
    pub logging: LoggingConfig,
    pub executor: ExecutorSettings,
}

/// Runtime daemon connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Daemon socket path or URL
    pub socket: String,
    /// Namespace every container of this executor is scoped to
    pub namespace: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            socket: default_runtime_socket(),
            namespace: "default".to_string(),
        }
    }
}

fn default_runtime_socket() -> String {
    "/var/run/docker.sock".to_string()
}

/// Executor behaviour
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorSettings {
    /// Names of the lifecycle hooks to enable, e.g. `remove_container`
    pub hooks: Vec<String>,
    /// Upper bound on how long a task may run before it is killed (0 = unbounded)
    pub stop_timeout_secs: u64,
}

impl ExecutorSettings {
    pub fn stop_timeout(&self) -> Option<Duration> {
        (self.stop_timeout_secs > 0).then(|| Duration::from_secs(self.stop_timeout_secs))
    }
}

impl ExecutorConfig {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        Self::load_from(&path)
    }

    /// Load configuration from a specific path, falling back to defaults if it is absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::TomlParseError {
            path: path.to_path_buf(),
            source: e,
        })?;
        config.validate()?;

        tracing::debug!(
            "Loaded config from {:?}: namespace={}, hooks={:?}",
            path,
            config.runtime.namespace,
            config.executor.hooks
        );

        Ok(config)
    }

    /// Reject settings the executor cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.runtime.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "runtime.namespace must not be empty".to_string(),
            ));
        }
        if self.runtime.socket.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "runtime.socket must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Get the default config file path
    pub fn config_path() -> Result<PathBuf> {
        if let Ok(dir) = std::env::var("CEXEC_CONFIG_DIR") {
            return Ok(PathBuf::from(dir).join("config.toml"));
        }
        let dirs = ProjectDirs::from("", "", "cexec").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}
