//! Logkeeper - process-local logging backbone
//!
//! Writes leveled records from every producer in the process (and from
//! cooperating processes over a loopback bridge) into daily, size-capped log
//! files, and sweeps files that have outlived the retention window.

pub mod bridge;
pub mod config;
pub mod logging;
pub mod service;

pub use config::{Config, RunMode};
pub use logging::{LogLevel, LogRecord, LogWriter, Metadata};
pub use service::{global, init, state, LogService, ServiceState};
