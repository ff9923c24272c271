//! Logging configuration
//!
//! Handed explicitly to whoever builds the subscriber; nothing here reads
//! process-wide state.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Minimum level of emitted log events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`
    pub fn as_directive(&self) -> &'static str {
        match self {
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_directive())
    }
}

// Unknown levels fall back to info rather than failing the whole config.
impl From<&str> for LogLevel {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "debug" => Self::Debug,
            "warn" | "warning" => Self::Warn,
            "error" => Self::Error,
            _ => Self::Info,
        }
    }
}

impl From<String> for LogLevel {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<LogLevel> for String {
    fn from(level: LogLevel) -> Self {
        level.as_directive().to_string()
    }
}

/// Output encoding of log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Minimum level
    pub level: LogLevel,
    /// Directory for `out.log` / `err.log`; logs go to stderr when unset
    pub log_dir: Option<PathBuf>,
    /// Line format
    pub format: LogFormat,
}

impl LoggingConfig {
    /// File receiving every event at or above `level`
    pub fn out_log_path(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join("out.log"))
    }

    /// File receiving error events only
    pub fn err_log_path(&self) -> Option<PathBuf> {
        self.log_dir.as_ref().map(|dir| dir.join("err.log"))
    }
}
