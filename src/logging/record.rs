//! Log records and levels
//!
//! A [`LogRecord`] is what every producer hands to the sink: in-process callers,
//! the console interceptor and the cross-process bridge all build one per line.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Severity of a log record
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// All levels, lowest severity first
    pub const ALL: [LogLevel; 4] = [
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
    ];

    /// Get the tag written into log lines
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    /// Check if this level belongs on stderr when echoed to the console
    pub fn is_alert(&self) -> bool {
        matches!(self, LogLevel::Warn | LogLevel::Error)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" | "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => anyhow::bail!("Unknown log level '{}'", other),
        }
    }
}

impl From<tracing::Level> for LogLevel {
    fn from(level: tracing::Level) -> Self {
        match level {
            tracing::Level::TRACE | tracing::Level::DEBUG => LogLevel::Debug,
            tracing::Level::INFO => LogLevel::Info,
            tracing::Level::WARN => LogLevel::Warn,
            tracing::Level::ERROR => LogLevel::Error,
        }
    }
}

/// Opaque values attached after the message, in order
pub type Metadata = Vec<Value>;

/// A single log record
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Log level
    pub level: LogLevel,
    /// Log message
    pub message: String,
    /// Values rendered after the message
    pub metadata: Metadata,
    /// When the record was produced; selects the target file
    pub timestamp: DateTime<Local>,
}

impl LogRecord {
    /// Create a record stamped with the current local time
    pub fn new(level: LogLevel, message: impl Into<String>, metadata: Metadata) -> Self {
        Self::at(Local::now(), level, message, metadata)
    }

    /// Create a record with an explicit timestamp
    pub fn at(
        timestamp: DateTime<Local>,
        level: LogLevel,
        message: impl Into<String>,
        metadata: Metadata,
    ) -> Self {
        Self {
            level,
            message: message.into(),
            metadata,
            timestamp,
        }
    }

    /// Render the record as one log line, without a trailing newline
    ///
    /// Format: `[YYYY:MM:DD HH:MM:SS] [LEVEL] message meta1 meta2`
    pub fn format_line(&self) -> String {
        let mut line = format!(
            "[{}] [{}] {}",
            self.timestamp.format("%Y:%m:%d %H:%M:%S"),
            self.level,
            self.message
        );
        for value in &self.metadata {
            line.push(' ');
            line.push_str(&render_value(value));
        }
        line
    }
}

/// Render a metadata value: strings verbatim, everything else as compact JSON
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
