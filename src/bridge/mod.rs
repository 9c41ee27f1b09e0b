//! Cross-process log bridge
//!
//! Other processes emit log requests onto four named channels, one per level.
//! Requests arrive over loopback HTTP, are queued in arrival order and written
//! through the same sink as in-process logging. Senders get no reply beyond
//! the transport's acceptance status.

pub mod client;
pub mod server;

pub use client::{BridgeClient, RemoteLogger};
pub use server::{
    create_channel, spawn_pump, start, BridgeReceiver, BridgeSender, ServerHandle,
    DEFAULT_CHANNEL_BUFFER,
};

use serde_json::Value;

use crate::logging::{render_value, LogLevel, LogRecord, Metadata};

/// Channel carrying debug records
pub const CHANNEL_DEBUG: &str = "log:debug";
/// Channel carrying info records
pub const CHANNEL_INFO: &str = "log:info";
/// Channel carrying warning records
pub const CHANNEL_WARN: &str = "log:warn";
/// Channel carrying error records
pub const CHANNEL_ERROR: &str = "log:error";

/// Get the channel name for a level
pub fn channel_name(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => CHANNEL_DEBUG,
        LogLevel::Info => CHANNEL_INFO,
        LogLevel::Warn => CHANNEL_WARN,
        LogLevel::Error => CHANNEL_ERROR,
    }
}

/// Get the level carried by a channel, if the channel exists
pub fn channel_level(name: &str) -> Option<LogLevel> {
    match name {
        CHANNEL_DEBUG => Some(LogLevel::Debug),
        CHANNEL_INFO => Some(LogLevel::Info),
        CHANNEL_WARN => Some(LogLevel::Warn),
        CHANNEL_ERROR => Some(LogLevel::Error),
        _ => None,
    }
}

/// A log request received from another process
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeMessage {
    pub level: LogLevel,
    pub message: String,
    pub metadata: Metadata,
}

impl BridgeMessage {
    pub fn new(level: LogLevel, message: impl Into<String>, metadata: Metadata) -> Self {
        Self {
            level,
            message: message.into(),
            metadata,
        }
    }

    /// Decode a request body
    ///
    /// The expected shape is a JSON array `[message, meta...]`. Anything else is
    /// accepted as-is: a lone JSON value becomes the message, a non-string first
    /// element is rendered as JSON, and a body that is not JSON at all is taken
    /// as raw text.
    pub fn from_payload(level: LogLevel, body: &[u8]) -> Self {
        match serde_json::from_slice::<Value>(body) {
            Ok(Value::Array(items)) => {
                let mut items = items.into_iter();
                let message = items.next().map(|v| render_value(&v)).unwrap_or_default();
                Self::new(level, message, items.collect())
            }
            Ok(other) => Self::new(level, render_value(&other), Vec::new()),
            Err(_) => Self::new(level, String::from_utf8_lossy(body), Vec::new()),
        }
    }

    /// Encode as a request body
    pub fn to_payload(&self) -> Value {
        let mut items = Vec::with_capacity(self.metadata.len() + 1);
        items.push(Value::from(self.message.as_str()));
        items.extend(self.metadata.iter().cloned());
        Value::Array(items)
    }

    /// Turn into a record stamped on arrival
    pub fn into_record(self) -> LogRecord {
        LogRecord::new(self.level, self.message, self.metadata)
    }
}
