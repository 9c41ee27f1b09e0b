//! Rotating file sink
//!
//! Appends formatted lines to `log-YYYY-MM-DD.log` in the log directory, rolling
//! over to a new file when the record's calendar date changes or when the active
//! file would grow past the size cap. Oversized days continue in numbered
//! segments: `log-YYYY-MM-DD.1.log`, `log-YYYY-MM-DD.2.log`, ...

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::SystemTime;

use chrono::{DateTime, Local, NaiveDate};

use super::console::ConsoleEcho;
use super::record::{LogLevel, LogRecord};
use crate::config::friendly_io_error_message;

/// Prefix shared by every log file name
pub const LOG_FILE_PREFIX: &str = "log-";

/// Extension shared by every log file name
pub const LOG_FILE_EXTENSION: &str = ".log";

/// Default size cap per file (10 MiB)
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Capability to write a log line at a level
///
/// Implemented by the sink and the service; the console interceptor and the
/// bridge only ever see this trait.
pub trait LogWriter: Send + Sync {
    /// Consume a fully built record
    fn write_record(&self, record: LogRecord);

    /// Write plain text at a level, stamped now
    fn write(&self, level: LogLevel, text: &str) {
        self.write_record(LogRecord::new(level, text, Vec::new()));
    }
}

/// Format a date as the `YYYY-MM-DD` key used in file names
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Build the file name for a date and segment
///
/// Segment 0 is the plain daily file.
pub fn log_file_name(date: NaiveDate, segment: u32) -> String {
    if segment == 0 {
        format!("{}{}{}", LOG_FILE_PREFIX, date_key(date), LOG_FILE_EXTENSION)
    } else {
        format!(
            "{}{}.{}{}",
            LOG_FILE_PREFIX,
            date_key(date),
            segment,
            LOG_FILE_EXTENSION
        )
    }
}

/// Resolve the file path for an instant and segment
pub fn resolve_path(logs_dir: &Path, at: DateTime<Local>, segment: u32) -> PathBuf {
    logs_dir.join(log_file_name(at.date_naive(), segment))
}

/// Parse a log file name back into its date and segment
///
/// Returns `None` for anything that does not follow the naming convention.
pub fn parse_log_file_name(name: &str) -> Option<(NaiveDate, u32)> {
    let stem = name
        .strip_prefix(LOG_FILE_PREFIX)?
        .strip_suffix(LOG_FILE_EXTENSION)?;

    let (date_part, segment) = match stem.split_once('.') {
        Some((date_part, segment)) => {
            if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            (date_part, segment.parse().ok()?)
        }
        None => (stem, 0),
    };

    // Strict width keeps names like "log-2024-1-5.log" out
    if date_part.len() != 10 {
        return None;
    }
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    Some((date, segment))
}

/// Creation time of a file, falling back to modification time
///
/// Some filesystems do not record a birth time.
pub fn file_created_at(metadata: &fs::Metadata) -> io::Result<SystemTime> {
    metadata.created().or_else(|_| metadata.modified())
}

/// The file currently receiving writes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    /// Full path to the log file
    pub path: PathBuf,
    /// Calendar date the file belongs to
    pub date: NaiveDate,
    /// `YYYY-MM-DD` form of `date`
    pub date_key: String,
    /// Size rollover counter within the day
    pub segment: u32,
    /// Bytes written so far, including content found on disk
    pub size_bytes: u64,
    /// When the file was created (or first selected, if not yet on disk)
    pub created_at: DateTime<Local>,
}

impl LogFile {
    fn open(logs_dir: &Path, date: NaiveDate, segment: u32, now: DateTime<Local>) -> Self {
        let path = logs_dir.join(log_file_name(date, segment));
        let (size_bytes, created_at) = match fs::metadata(&path) {
            Ok(metadata) => (
                metadata.len(),
                file_created_at(&metadata)
                    .map(DateTime::<Local>::from)
                    .unwrap_or(now),
            ),
            Err(_) => (0, now),
        };

        Self {
            path,
            date,
            date_key: date_key(date),
            segment,
            size_bytes,
            created_at,
        }
    }
}

#[derive(Default)]
struct SinkState {
    active: Option<LogFile>,
    /// Set while appends keep failing, so a failure is reported once
    failing: bool,
}

/// Appends records to date- and size-rotated files
pub struct RotatingSink {
    logs_dir: PathBuf,
    max_file_size: u64,
    console: Arc<ConsoleEcho>,
    state: Mutex<SinkState>,
}

impl RotatingSink {
    /// Create a sink writing into `logs_dir`
    ///
    /// Does not touch the filesystem; call [`RotatingSink::ensure_dir`] first.
    pub fn new(logs_dir: PathBuf, max_file_size: u64, console: Arc<ConsoleEcho>) -> Self {
        Self {
            logs_dir,
            max_file_size: max_file_size.max(1),
            console,
            state: Mutex::new(SinkState::default()),
        }
    }

    /// Directory holding the log files
    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Size cap per file
    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Console echo attached to this sink
    pub fn console(&self) -> &Arc<ConsoleEcho> {
        &self.console
    }

    /// Create the log directory if needed
    ///
    /// Failure is reported on the console and returned, but the sink stays
    /// usable; writes will fail quietly until the directory appears.
    pub fn ensure_dir(&self) -> io::Result<()> {
        if let Err(e) = fs::create_dir_all(&self.logs_dir) {
            self.console.report(&friendly_io_error_message(
                &e,
                &format!("Failed to create log directory {}", self.logs_dir.display()),
            ));
            return Err(e);
        }
        Ok(())
    }

    /// Snapshot of the file currently receiving writes
    pub fn active_file(&self) -> Option<LogFile> {
        self.lock_state().active.clone()
    }

    /// Path of the file currently receiving writes
    pub fn active_path(&self) -> Option<PathBuf> {
        self.lock_state().active.as_ref().map(|f| f.path.clone())
    }

    fn lock_state(&self) -> MutexGuard<'_, SinkState> {
        // Poisoning is ignored: logging must never panic
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Pick the file for a write of `pending` bytes, rotating as needed
    fn select_target<'a>(
        &self,
        state: &'a mut SinkState,
        at: DateTime<Local>,
        pending: u64,
    ) -> &'a mut LogFile {
        let date = at.date_naive();
        let needs_date_rotation = state.active.as_ref().map_or(true, |f| f.date != date);
        if needs_date_rotation {
            let segment = self.latest_segment(date);
            state.active = Some(LogFile::open(&self.logs_dir, date, segment, at));
        }

        let active = state.active.get_or_insert_with(|| LogFile::open(&self.logs_dir, date, 0, at));
        while active.size_bytes > 0 && active.size_bytes + pending > self.max_file_size {
            *active = LogFile::open(&self.logs_dir, date, active.segment + 1, at);
        }
        active
    }

    /// Highest segment already on disk for a date, or 0
    fn latest_segment(&self, date: NaiveDate) -> u32 {
        let Ok(entries) = fs::read_dir(&self.logs_dir) else {
            return 0;
        };

        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                parse_log_file_name(name.to_str()?)
            })
            .filter(|(d, _)| *d == date)
            .map(|(_, segment)| segment)
            .max()
            .unwrap_or(0)
    }

    fn append_line(path: &Path, line: &str) -> io::Result<()> {
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        let mut buf = String::with_capacity(line.len() + 1);
        buf.push_str(line);
        buf.push('\n');
        file.write_all(buf.as_bytes())
    }
}

impl LogWriter for RotatingSink {
    fn write_record(&self, record: LogRecord) {
        let line = record.format_line();
        self.console.echo(record.level, &line);

        let pending = line.len() as u64 + 1;
        let mut guard = self.lock_state();
        let state = &mut *guard;
        let path = self
            .select_target(state, record.timestamp, pending)
            .path
            .clone();

        let mut result = Self::append_line(&path, &line);
        if matches!(&result, Err(e) if e.kind() == io::ErrorKind::NotFound)
            && fs::create_dir_all(&self.logs_dir).is_ok()
        {
            result = Self::append_line(&path, &line);
        }

        match result {
            Ok(()) => {
                if let Some(active) = state.active.as_mut() {
                    active.size_bytes += pending;
                }
                if state.failing {
                    state.failing = false;
                    self.console
                        .report(&format!("Log writes recovered ({})", path.display()));
                }
            }
            Err(e) => {
                if !state.failing {
                    state.failing = true;
                    self.console.report(&friendly_io_error_message(
                        &e,
                        &format!("Failed to write log file {}", path.display()),
                    ));
                }
            }
        }
    }
}
