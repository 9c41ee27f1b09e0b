//! Log file retention management
//!
//! Deletes log files whose creation time is older than the retention window.
//! Sweeps are best-effort: a file that cannot be inspected or removed is
//! recorded and skipped, and the rest of the directory is still processed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use thiserror::Error;
use tracing::{debug, info, warn};

use super::sink::{file_created_at, parse_log_file_name};

/// Default retention period in days
pub const DEFAULT_RETENTION_DAYS: u64 = 7;

/// Default time between sweeps (24h)
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// How long log files live and how often they are swept
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Files older than this many days are deleted
    pub window_days: u64,
    /// Time between scheduled sweeps
    pub sweep_interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_RETENTION_DAYS,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl RetentionPolicy {
    /// Retention window as a duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_days.saturating_mul(SECS_PER_DAY))
    }

    /// Check whether a file created at `created_at` has expired at `now`
    ///
    /// Strictly older than the window; files from the future never expire.
    pub fn is_expired(&self, created_at: SystemTime, now: SystemTime) -> bool {
        now.duration_since(created_at)
            .map(|age| age > self.window())
            .unwrap_or(false)
    }
}

/// A per-entry (or directory-level) failure during a sweep
#[derive(Debug, Error)]
pub enum SweepError {
    #[error("failed to list log directory {}: {}", .path.display(), .source)]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read metadata for {}: {}", .path.display(), .source)]
    Stat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to delete log file {}: {}", .path.display(), .source)]
    Remove {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Outcome of one sweep, for diagnostics
#[derive(Debug, Default)]
pub struct SweepReport {
    /// Entries matching the log file naming convention
    pub examined: usize,
    /// Files removed
    pub deleted: Vec<PathBuf>,
    /// Failures that were skipped over
    pub failures: Vec<SweepError>,
}

impl SweepReport {
    /// Number of files removed
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }
}

/// What the sweeper needs to know about a directory entry
#[derive(Debug, Clone, Copy)]
pub struct EntryStat {
    pub is_file: bool,
    pub created_at: SystemTime,
}

/// Filesystem operations used by the sweeper
pub trait LogDirectory: Send + Sync {
    /// List entry paths, or `None` if the directory does not exist
    fn list(&self, dir: &Path) -> io::Result<Option<Vec<PathBuf>>>;

    /// Inspect one entry without following symlinks
    fn stat(&self, path: &Path) -> io::Result<EntryStat>;

    /// Delete one file
    fn remove(&self, path: &Path) -> io::Result<()>;
}

/// The real filesystem
#[derive(Debug, Default, Clone, Copy)]
pub struct OsDirectory;

impl LogDirectory for OsDirectory {
    fn list(&self, dir: &Path) -> io::Result<Option<Vec<PathBuf>>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let mut paths = Vec::new();
        for entry in entries {
            paths.push(entry?.path());
        }
        Ok(Some(paths))
    }

    fn stat(&self, path: &Path) -> io::Result<EntryStat> {
        let metadata = fs::symlink_metadata(path)?;
        Ok(EntryStat {
            is_file: metadata.is_file(),
            created_at: file_created_at(&metadata)?,
        })
    }

    fn remove(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }
}

/// Deletes expired log files from one directory
pub struct Sweeper {
    logs_dir: PathBuf,
    policy: RetentionPolicy,
    directory: Arc<dyn LogDirectory>,
}

impl Sweeper {
    /// Create a sweeper over the real filesystem
    pub fn new(logs_dir: PathBuf, policy: RetentionPolicy) -> Self {
        Self::with_directory(logs_dir, policy, Arc::new(OsDirectory))
    }

    /// Create a sweeper over a custom directory implementation
    pub fn with_directory(
        logs_dir: PathBuf,
        policy: RetentionPolicy,
        directory: Arc<dyn LogDirectory>,
    ) -> Self {
        Self {
            logs_dir,
            policy,
            directory,
        }
    }

    /// The policy this sweeper enforces
    pub fn policy(&self) -> RetentionPolicy {
        self.policy
    }

    /// Directory being swept
    pub fn logs_dir(&self) -> &Path {
        &self.logs_dir
    }

    /// Delete expired log files as of `now`
    ///
    /// `protected` is never deleted; pass the sink's active file. A missing
    /// directory is not an error.
    pub fn sweep(&self, now: SystemTime, protected: Option<&Path>) -> SweepReport {
        let mut report = SweepReport::default();

        let paths = match self.directory.list(&self.logs_dir) {
            Ok(Some(paths)) => paths,
            Ok(None) => {
                debug!(dir = %self.logs_dir.display(), "Log directory missing, nothing to sweep");
                return report;
            }
            Err(source) => {
                let error = SweepError::ReadDir {
                    path: self.logs_dir.clone(),
                    source,
                };
                warn!("{}", error);
                report.failures.push(error);
                return report;
            }
        };

        for path in paths {
            let is_log_file = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(parse_log_file_name)
                .is_some();
            if !is_log_file {
                continue;
            }
            report.examined += 1;

            if protected == Some(path.as_path()) {
                continue;
            }

            let stat = match self.directory.stat(&path) {
                Ok(stat) => stat,
                Err(source) => {
                    let error = SweepError::Stat { path, source };
                    warn!("{}", error);
                    report.failures.push(error);
                    continue;
                }
            };

            if !stat.is_file || !self.policy.is_expired(stat.created_at, now) {
                continue;
            }

            match self.directory.remove(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Deleted expired log file");
                    report.deleted.push(path);
                }
                Err(source) => {
                    let error = SweepError::Remove { path, source };
                    warn!("{}", error);
                    report.failures.push(error);
                }
            }
        }

        if !report.deleted.is_empty() {
            info!(
                "Cleaned up {} old log files ({} kept, {} failed)",
                report.deleted_count(),
                report
                    .examined
                    .saturating_sub(report.deleted_count() + report.failures.len()),
                report.failures.len()
            );
        }

        report
    }
}

/// Clean up log files older than the default retention period
pub fn cleanup_old_logs(logs_dir: &Path) -> SweepReport {
    cleanup_old_logs_with_retention(logs_dir, DEFAULT_RETENTION_DAYS)
}

/// Clean up log files older than the specified number of days
pub fn cleanup_old_logs_with_retention(logs_dir: &Path, retention_days: u64) -> SweepReport {
    let policy = RetentionPolicy {
        window_days: retention_days,
        ..RetentionPolicy::default()
    };
    Sweeper::new(logs_dir.to_path_buf(), policy).sweep(SystemTime::now(), None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use std::collections::BTreeMap;
    use std::fs::File;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(SECS_PER_DAY);

    #[derive(Clone, Copy)]
    struct FakeEntry {
        created_at: SystemTime,
        is_file: bool,
        stat_fails: bool,
        remove_fails: bool,
    }

    impl FakeEntry {
        fn file(created_at: SystemTime) -> Self {
            Self {
                created_at,
                is_file: true,
                stat_fails: false,
                remove_fails: false,
            }
        }
    }

    /// In-memory directory with controllable creation times and failures
    #[derive(Default)]
    struct FakeDirectory {
        entries: Mutex<BTreeMap<PathBuf, FakeEntry>>,
        missing: bool,
    }

    impl FakeDirectory {
        fn with(entries: Vec<(&str, FakeEntry)>) -> Arc<Self> {
            let map = entries
                .into_iter()
                .map(|(name, entry)| (logs_dir().join(name), entry))
                .collect();
            Arc::new(Self {
                entries: Mutex::new(map),
                missing: false,
            })
        }

        fn names(&self) -> Vec<String> {
            self.entries
                .lock()
                .unwrap()
                .keys()
                .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
                .collect()
        }
    }

    impl LogDirectory for FakeDirectory {
        fn list(&self, _dir: &Path) -> io::Result<Option<Vec<PathBuf>>> {
            if self.missing {
                return Ok(None);
            }
            Ok(Some(self.entries.lock().unwrap().keys().cloned().collect()))
        }

        fn stat(&self, path: &Path) -> io::Result<EntryStat> {
            let entries = self.entries.lock().unwrap();
            let entry = entries
                .get(path)
                .ok_or_else(|| io::Error::from(io::ErrorKind::NotFound))?;
            if entry.stat_fails {
                return Err(io::Error::from(io::ErrorKind::PermissionDenied));
            }
            Ok(EntryStat {
                is_file: entry.is_file,
                created_at: entry.created_at,
            })
        }

        fn remove(&self, path: &Path) -> io::Result<()> {
            let mut entries = self.entries.lock().unwrap();
            match entries.get(path) {
                Some(entry) if entry.remove_fails => {
                    Err(io::Error::from(io::ErrorKind::PermissionDenied))
                }
                Some(_) => {
                    entries.remove(path);
                    Ok(())
                }
                None => Err(io::Error::from(io::ErrorKind::NotFound)),
            }
        }
    }

    fn logs_dir() -> PathBuf {
        PathBuf::from("/virtual/logs")
    }

    fn sweeper_over(directory: Arc<FakeDirectory>, window_days: u64) -> Sweeper {
        let policy = RetentionPolicy {
            window_days,
            ..RetentionPolicy::default()
        };
        Sweeper::with_directory(logs_dir(), policy, directory)
    }

    fn now() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_window_boundaries() {
        let now = now();
        let directory = FakeDirectory::with(vec![
            ("log-2023-11-06.log", FakeEntry::file(now - 8 * DAY)),
            ("log-2023-11-07.log", FakeEntry::file(now - 7 * DAY - Duration::from_secs(1))),
            ("log-2023-11-08.log", FakeEntry::file(now - 7 * DAY)),
            ("log-2023-11-09.log", FakeEntry::file(now - 6 * DAY)),
        ]);

        let report = sweeper_over(Arc::clone(&directory), 7).sweep(now, None);

        assert_eq!(report.deleted_count(), 2);
        assert_eq!(report.examined, 4);
        assert!(report.failures.is_empty());
        assert_eq!(
            directory.names(),
            vec!["log-2023-11-08.log", "log-2023-11-09.log"]
        );
    }

    #[test]
    fn test_dated_files_against_calendar_now() {
        let at = |d| SystemTime::from(Local.with_ymd_and_hms(2024, 1, d, 12, 0, 0).unwrap());
        let directory = FakeDirectory::with(vec![
            ("log-2024-01-01.log", FakeEntry::file(at(1))),
            ("log-2024-01-09.log", FakeEntry::file(at(9))),
        ]);

        sweeper_over(Arc::clone(&directory), 7).sweep(at(10), None);

        assert_eq!(directory.names(), vec!["log-2024-01-09.log"]);
    }

    #[test]
    fn test_stat_failure_does_not_abort_sweep() {
        let now = now();
        let mut broken = FakeEntry::file(now - 30 * DAY);
        broken.stat_fails = true;
        let directory = FakeDirectory::with(vec![
            ("log-2023-10-01.log", FakeEntry::file(now - 30 * DAY)),
            ("log-2023-10-02.log", broken),
            ("log-2023-10-03.log", FakeEntry::file(now - 30 * DAY)),
            ("log-2023-11-13.log", FakeEntry::file(now - DAY)),
        ]);

        let report = sweeper_over(Arc::clone(&directory), 7).sweep(now, None);

        assert_eq!(report.deleted_count(), 2);
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(report.failures[0], SweepError::Stat { .. }));
        assert_eq!(
            directory.names(),
            vec!["log-2023-10-02.log", "log-2023-11-13.log"]
        );
    }

    #[test]
    fn test_remove_failure_does_not_abort_sweep() {
        let now = now();
        let mut stuck = FakeEntry::file(now - 30 * DAY);
        stuck.remove_fails = true;
        let directory = FakeDirectory::with(vec![
            ("log-2023-10-01.log", stuck),
            ("log-2023-10-02.log", FakeEntry::file(now - 30 * DAY)),
        ]);

        let report = sweeper_over(Arc::clone(&directory), 7).sweep(now, None);

        assert_eq!(report.deleted_count(), 1);
        assert!(matches!(report.failures[0], SweepError::Remove { .. }));
        assert_eq!(directory.names(), vec!["log-2023-10-01.log"]);
    }

    #[test]
    fn test_protected_file_is_kept() {
        let now = now();
        let directory = FakeDirectory::with(vec![
            ("log-2023-10-01.log", FakeEntry::file(now - 30 * DAY)),
            ("log-2023-10-01.1.log", FakeEntry::file(now - 30 * DAY)),
        ]);
        let active = logs_dir().join("log-2023-10-01.1.log");

        let report = sweeper_over(Arc::clone(&directory), 7).sweep(now, Some(&active));

        assert_eq!(report.deleted_count(), 1);
        assert_eq!(directory.names(), vec!["log-2023-10-01.1.log"]);
    }

    #[test]
    fn test_non_files_and_foreign_names_are_skipped() {
        let now = now();
        let mut dir_entry = FakeEntry::file(now - 30 * DAY);
        dir_entry.is_file = false;
        let directory = FakeDirectory::with(vec![
            ("log-2023-10-01.log", dir_entry),
            ("notes.txt", FakeEntry::file(now - 30 * DAY)),
            ("app-2023-10-01.log", FakeEntry::file(now - 30 * DAY)),
        ]);

        let report = sweeper_over(Arc::clone(&directory), 7).sweep(now, None);

        assert_eq!(report.deleted_count(), 0);
        assert_eq!(report.examined, 1);
        assert_eq!(directory.names().len(), 3);
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let now = now();
        let directory = FakeDirectory::with(vec![
            ("log-2023-10-01.log", FakeEntry::file(now - 30 * DAY)),
            ("log-2023-11-13.log", FakeEntry::file(now - DAY)),
        ]);
        let sweeper = sweeper_over(Arc::clone(&directory), 7);

        assert_eq!(sweeper.sweep(now, None).deleted_count(), 1);
        assert_eq!(sweeper.sweep(now, None).deleted_count(), 0);
        assert_eq!(directory.names(), vec!["log-2023-11-13.log"]);
    }

    #[test]
    fn test_missing_fake_directory_is_noop() {
        let directory = Arc::new(FakeDirectory {
            missing: true,
            ..FakeDirectory::default()
        });
        let report = sweeper_over(directory, 7).sweep(now(), None);
        assert_eq!(report.deleted_count(), 0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_future_creation_time_never_expires() {
        let policy = RetentionPolicy::default();
        assert!(!policy.is_expired(now() + DAY, now()));
        assert!(policy.is_expired(now() - 8 * DAY, now()));
    }

    #[test]
    fn test_cleanup_empty_dir() {
        let temp_dir = TempDir::new().unwrap();
        let report = cleanup_old_logs(temp_dir.path());
        assert_eq!(report.deleted_count(), 0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_cleanup_nonexistent_dir() {
        let path = Path::new("/nonexistent/path/for/testing");
        let report = cleanup_old_logs(path);
        assert_eq!(report.deleted_count(), 0);
        assert!(report.failures.is_empty());
    }

    #[test]
    fn test_cleanup_ignores_non_log_files() {
        let temp_dir = TempDir::new().unwrap();

        let other_file = temp_dir.path().join("other.txt");
        File::create(&other_file)
            .unwrap()
            .write_all(b"test")
            .unwrap();

        let wrong_prefix = temp_dir.path().join("other-2026-01-01.log");
        File::create(&wrong_prefix)
            .unwrap()
            .write_all(b"test")
            .unwrap();

        // Zero-day window: anything matching would be eligible after a second
        let report = cleanup_old_logs_with_retention(temp_dir.path(), 0);
        assert_eq!(report.examined, 0);

        assert!(other_file.exists());
        assert!(wrong_prefix.exists());
    }

    #[test]
    fn test_cleanup_keeps_recent_files() {
        let temp_dir = TempDir::new().unwrap();

        let log_file = temp_dir.path().join("log-2026-01-21.log");
        File::create(&log_file)
            .unwrap()
            .write_all(b"test log content")
            .unwrap();

        let report = cleanup_old_logs(temp_dir.path());
        assert_eq!(report.examined, 1);
        assert_eq!(report.deleted_count(), 0);

        assert!(log_file.exists());
    }

    #[test]
    fn test_os_directory_stat_reports_directories() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("log-2020-01-01.log");
        fs::create_dir(&nested).unwrap();

        let stat = OsDirectory.stat(&nested).unwrap();
        assert!(!stat.is_file);

        let listed = OsDirectory.list(temp_dir.path()).unwrap().unwrap();
        assert_eq!(listed, vec![nested]);
    }
}
