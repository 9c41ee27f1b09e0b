//! Configuration management for logkeeper

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bridge::DEFAULT_CHANNEL_BUFFER;
use crate::logging::{LogLevel, DEFAULT_MAX_FILE_SIZE};

/// Environment variable that overrides the configured run mode
pub const MODE_ENV_VAR: &str = "LOGKEEPER_ENV";

/// Default application name, used for the data and config directories
pub const DEFAULT_APP_NAME: &str = "logkeeper";

/// Categories of disk errors for user-friendly messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiskErrorKind {
    /// Disk is full or quota exceeded
    DiskFull,
    /// Permission denied (read or write)
    PermissionDenied,
    /// File or directory not found
    NotFound,
    /// Other IO error
    Other,
}

impl DiskErrorKind {
    /// Get a user-friendly message for this error kind
    pub fn user_message(&self) -> &'static str {
        match self {
            DiskErrorKind::DiskFull => "disk full",
            DiskErrorKind::PermissionDenied => "permission denied",
            DiskErrorKind::NotFound => "file or directory not found",
            DiskErrorKind::Other => "I/O error",
        }
    }
}

/// Categorize an IO error into a user-friendly category
pub fn categorize_io_error(e: &std::io::Error) -> DiskErrorKind {
    use std::io::ErrorKind;

    match e.kind() {
        ErrorKind::WriteZero => DiskErrorKind::DiskFull,
        ErrorKind::PermissionDenied => DiskErrorKind::PermissionDenied,
        ErrorKind::NotFound => DiskErrorKind::NotFound,

        // Check raw OS error for disk full on Unix
        _ => {
            #[cfg(unix)]
            {
                if let Some(os_error) = e.raw_os_error() {
                    if os_error == libc::ENOSPC || os_error == libc::EDQUOT {
                        return DiskErrorKind::DiskFull;
                    }
                    if os_error == libc::EACCES {
                        return DiskErrorKind::PermissionDenied;
                    }
                }
            }
            DiskErrorKind::Other
        }
    }
}

/// Create a user-friendly error message from an IO error
pub fn friendly_io_error_message(e: &std::io::Error, context: &str) -> String {
    match categorize_io_error(e) {
        DiskErrorKind::Other => format!("{}: {}", context, e),
        kind => format!("{}: {}", context, kind.user_message()),
    }
}

/// Runtime mode, controls console verbosity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Echo everything from debug up
    Development,
    /// Echo info and above
    #[default]
    Production,
}

impl RunMode {
    /// Parse a mode name, accepting the usual short forms
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Some(RunMode::Development),
            "production" | "prod" => Some(RunMode::Production),
            _ => None,
        }
    }

    /// Lowest level echoed to the console in this mode
    ///
    /// The file layer is unaffected and always records debug and above.
    pub fn console_level(&self) -> LogLevel {
        match self {
            RunMode::Development => LogLevel::Debug,
            RunMode::Production => LogLevel::Info,
        }
    }
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application name, used for the per-user data directory
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Log directory override (default: `<data dir>/<app_name>/logs`)
    #[serde(default)]
    pub logs_dir: Option<PathBuf>,

    /// Days a log file is kept before the sweeper deletes it (default: 7)
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// Seconds between retention sweeps (default: 86400 = 24h)
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Size cap per log file in bytes (default: 10 MiB)
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,

    /// Run mode; the LOGKEEPER_ENV environment variable takes precedence
    #[serde(default)]
    pub mode: RunMode,

    /// Redirect stdout/stderr and tracing output into the log files
    #[serde(default = "default_true")]
    pub capture_console: bool,

    /// Start the cross-process bridge
    #[serde(default = "default_true")]
    pub bridge_enabled: bool,

    /// Loopback port for the bridge; 0 picks a free port
    #[serde(default = "default_bridge_port")]
    pub bridge_port: u16,

    /// Messages the bridge queues before dropping
    #[serde(default = "default_bridge_buffer")]
    pub bridge_buffer: usize,
}

fn default_app_name() -> String {
    DEFAULT_APP_NAME.to_string()
}

fn default_retention_days() -> u64 {
    7
}

fn default_sweep_interval_secs() -> u64 {
    24 * 60 * 60
}

fn default_max_file_size() -> u64 {
    DEFAULT_MAX_FILE_SIZE
}

fn default_true() -> bool {
    true
}

fn default_bridge_port() -> u16 {
    9876
}

fn default_bridge_buffer() -> usize {
    DEFAULT_CHANNEL_BUFFER
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            logs_dir: None,
            retention_days: default_retention_days(),
            sweep_interval_secs: default_sweep_interval_secs(),
            max_file_size: default_max_file_size(),
            mode: RunMode::default(),
            capture_console: true,
            bridge_enabled: true,
            bridge_port: default_bridge_port(),
            bridge_buffer: default_bridge_buffer(),
        }
    }
}

impl Config {
    /// Load configuration from the default location, or return default if not found
    pub fn load() -> Result<Self> {
        Self::load_from(&config_file_path(DEFAULT_APP_NAME))
    }

    /// Load configuration from a file, or return default if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to a file, creating its directory
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    /// Resolved log directory
    pub fn resolved_logs_dir(&self) -> PathBuf {
        self.logs_dir
            .clone()
            .unwrap_or_else(|| default_logs_dir(&self.app_name))
    }

    /// Interval between sweeps, never zero
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    /// Run mode after applying the LOGKEEPER_ENV override
    pub fn effective_mode(&self) -> RunMode {
        std::env::var(MODE_ENV_VAR)
            .ok()
            .and_then(|v| RunMode::parse(&v))
            .unwrap_or(self.mode)
    }
}

/// Get the per-user data directory for an application
/// Falls back to ./.<app_name> if the platform directory cannot be determined
pub fn data_dir(app_name: &str) -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join(app_name))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", app_name)))
}

/// Get the default log directory for an application
pub fn default_logs_dir(app_name: &str) -> PathBuf {
    data_dir(app_name).join("logs")
}

/// Get the path to the config file for an application
pub fn config_file_path(app_name: &str) -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join(app_name))
        .unwrap_or_else(|| PathBuf::from(format!(".{}", app_name)))
        .join("config.toml")
}
