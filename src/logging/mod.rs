//! Logging pipeline for logkeeper
//!
//! Provides the rotating file sink, retention sweeping, console interception
//! and the record types shared by every producer.

mod console;
mod interceptor;
mod panic_hook;
mod record;
mod retention;
mod sink;

pub use console::ConsoleEcho;
pub use interceptor::{
    forward_lines, stderr_captured, tracing_filter, CaptureOptions, ConsoleInterceptor,
    InstallOutcome, SinkLayer,
};
pub use panic_hook::{install_panic_hook, panic_record};
pub use record::{render_value, LogLevel, LogRecord, Metadata};
pub use retention::{
    cleanup_old_logs, cleanup_old_logs_with_retention, EntryStat, LogDirectory, OsDirectory,
    RetentionPolicy, SweepError, SweepReport, Sweeper, DEFAULT_RETENTION_DAYS,
    DEFAULT_SWEEP_INTERVAL,
};
pub use sink::{
    date_key, file_created_at, log_file_name, parse_log_file_name, resolve_path, LogFile,
    LogWriter, RotatingSink, DEFAULT_MAX_FILE_SIZE, LOG_FILE_EXTENSION, LOG_FILE_PREFIX,
};
