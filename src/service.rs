//! Log service lifecycle
//!
//! [`LogService`] wires the sink, the console interceptor, the retention
//! sweeper and the cross-process bridge together. It can be constructed
//! directly and passed around, or through [`init`], which keeps exactly one
//! instance for the whole process.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde_json::json;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::warn;

use crate::bridge::{self, BridgeSender, ServerHandle};
use crate::config::{Config, RunMode};
use crate::logging::{
    install_panic_hook, CaptureOptions, ConsoleEcho, ConsoleInterceptor, LogFile, LogLevel,
    LogRecord, LogWriter, Metadata, RetentionPolicy, RotatingSink, SweepReport, Sweeper,
};

/// Lifecycle of the process-wide service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// `init` has not been called
    Uninitialized,
    /// The first `init` call is wiring components
    Initializing,
    /// Ready; stays here until the process exits
    Running,
}

impl ServiceState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => ServiceState::Initializing,
            2 => ServiceState::Running,
            _ => ServiceState::Uninitialized,
        }
    }
}

static SERVICE: OnceCell<Arc<LogService>> = OnceCell::const_new();
static STATE: AtomicU8 = AtomicU8::new(0);

/// Initialize the process-wide service, or return the existing one
///
/// Only the first caller's config is used. Concurrent callers wait for the
/// first initialization to finish and receive the same instance.
pub async fn init(config: Config) -> Arc<LogService> {
    SERVICE
        .get_or_init(|| async move {
            STATE.store(ServiceState::Initializing as u8, Ordering::SeqCst);
            let service = LogService::start(config).await;
            STATE.store(ServiceState::Running as u8, Ordering::SeqCst);
            service
        })
        .await
        .clone()
}

/// The process-wide service, if initialized
pub fn global() -> Option<Arc<LogService>> {
    SERVICE.get().cloned()
}

/// Current lifecycle state of the process-wide service
pub fn state() -> ServiceState {
    ServiceState::from_u8(STATE.load(Ordering::SeqCst))
}

struct BridgeEndpoint {
    sender: BridgeSender,
    server: Option<ServerHandle>,
    pump: JoinHandle<()>,
}

/// Owns the log directory and every component writing to or sweeping it
pub struct LogService {
    config: Config,
    mode: RunMode,
    sink: Arc<RotatingSink>,
    sweeper: Arc<Sweeper>,
    bridge: Option<BridgeEndpoint>,
    sweep_task: JoinHandle<()>,
}

impl LogService {
    /// Build and start a service
    ///
    /// In order: resolve and create the log directory, configure the sink,
    /// install console capture (if enabled), sweep once, start the bridge,
    /// record a startup line, start the sweep timer. Nothing here fails: a
    /// directory or bridge problem is reported and the service runs degraded.
    pub async fn start(config: Config) -> Arc<Self> {
        let logs_dir = config.resolved_logs_dir();
        let mode = config.effective_mode();

        let console = Arc::new(ConsoleEcho::new(Some(mode.console_level())));
        let sink = Arc::new(RotatingSink::new(
            logs_dir.clone(),
            config.max_file_size,
            Arc::clone(&console),
        ));
        // Failure is already reported on the console
        let _ = sink.ensure_dir();

        if config.capture_console {
            let writer: Arc<dyn LogWriter> = sink.clone();
            ConsoleInterceptor::process().install(
                Arc::clone(&writer),
                &console,
                CaptureOptions::default(),
            );
            install_panic_hook(writer);
        }

        let policy = RetentionPolicy {
            window_days: config.retention_days,
            sweep_interval: config.sweep_interval(),
        };
        let sweeper = Arc::new(Sweeper::new(logs_dir.clone(), policy));
        run_sweep(&sink, &sweeper).await;

        let bridge = if config.bridge_enabled {
            Some(start_bridge(&config, &sink).await)
        } else {
            None
        };

        let bridge_addr = bridge
            .as_ref()
            .and_then(|b| b.server.as_ref())
            .map(|s| s.addr().to_string());
        sink.write_record(LogRecord::new(
            LogLevel::Info,
            "LogService initialized successfully.",
            vec![json!({
                "logs_dir": logs_dir.display().to_string(),
                "mode": mode,
                "retention_days": policy.window_days,
                "bridge": bridge_addr,
            })],
        ));

        let sweep_task = spawn_sweep_timer(
            Arc::clone(&sink),
            Arc::clone(&sweeper),
            policy.sweep_interval,
        );

        Arc::new(Self {
            config,
            mode,
            sink,
            sweeper,
            bridge,
            sweep_task,
        })
    }

    /// Write a record at a level
    pub fn log(&self, level: LogLevel, message: impl Into<String>, metadata: Metadata) {
        self.sink
            .write_record(LogRecord::new(level, message, metadata));
    }

    pub fn debug(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(LogLevel::Debug, message, metadata);
    }

    pub fn info(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(LogLevel::Info, message, metadata);
    }

    pub fn warn(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(LogLevel::Warn, message, metadata);
    }

    pub fn error(&self, message: impl Into<String>, metadata: Metadata) {
        self.log(LogLevel::Error, message, metadata);
    }

    /// Run a sweep now, off the calling task
    pub async fn sweep_now(&self) -> SweepReport {
        run_sweep(&self.sink, &self.sweeper).await
    }

    /// Directory holding the log files
    pub fn logs_dir(&self) -> &Path {
        self.sink.logs_dir()
    }

    /// File currently receiving writes
    pub fn active_log_file(&self) -> Option<LogFile> {
        self.sink.active_file()
    }

    /// Address the bridge listens on, if it is running
    pub fn bridge_addr(&self) -> Option<SocketAddr> {
        self.bridge
            .as_ref()
            .and_then(|b| b.server.as_ref())
            .map(|s| s.addr())
    }

    /// In-process sender onto the bridge queue
    pub fn bridge_sender(&self) -> Option<BridgeSender> {
        self.bridge.as_ref().map(|b| b.sender.clone())
    }

    /// Effective run mode
    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Configuration the service was started with
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Retention policy being enforced
    pub fn retention_policy(&self) -> RetentionPolicy {
        self.sweeper.policy()
    }
}

impl LogWriter for LogService {
    fn write_record(&self, record: LogRecord) {
        self.sink.write_record(record);
    }
}

impl Drop for LogService {
    fn drop(&mut self) {
        self.sweep_task.abort();
        if let Some(mut bridge) = self.bridge.take() {
            if let Some(server) = bridge.server.take() {
                server.shutdown();
            }
            bridge.pump.abort();
        }
    }
}

async fn start_bridge(config: &Config, sink: &Arc<RotatingSink>) -> BridgeEndpoint {
    let (sender, receiver) = bridge::create_channel(config.bridge_buffer);
    let pump = bridge::spawn_pump(receiver, sink.clone());

    let server = match bridge::start(config.bridge_port, sender.clone()).await {
        Ok(handle) => Some(handle),
        Err(e) => {
            sink.write_record(LogRecord::new(
                LogLevel::Error,
                format!("Failed to start log bridge: {:#}", e),
                Vec::new(),
            ));
            None
        }
    };

    BridgeEndpoint {
        sender,
        server,
        pump,
    }
}

/// Sweep on the blocking pool, sparing the sink's active file
async fn run_sweep(sink: &Arc<RotatingSink>, sweeper: &Arc<Sweeper>) -> SweepReport {
    let protected = sink.active_path();
    let sweeper = Arc::clone(sweeper);
    let task =
        tokio::task::spawn_blocking(move || sweeper.sweep(SystemTime::now(), protected.as_deref()));

    match task.await {
        Ok(report) => report,
        Err(e) => {
            warn!("Log sweep task failed: {}", e);
            SweepReport::default()
        }
    }
}

/// Sweep every `period`, first tick one period after start
fn spawn_sweep_timer(
    sink: Arc<RotatingSink>,
    sweeper: Arc<Sweeper>,
    period: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        // Missed ticks are not made up
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_sweep(&sink, &sweeper).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeClient, BridgeMessage};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn test_config(logs_dir: PathBuf) -> Config {
        Config {
            logs_dir: Some(logs_dir),
            capture_console: false,
            bridge_port: 0,
            ..Config::default()
        }
    }

    /// Concatenated contents of every log file, oldest name first
    fn read_all_logs(dir: &Path) -> String {
        let mut names: Vec<PathBuf> = fs::read_dir(dir)
            .map(|entries| entries.filter_map(|e| e.ok()).map(|e| e.path()).collect())
            .unwrap_or_default();
        names.sort();
        names
            .iter()
            .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
            .filter_map(|p| fs::read_to_string(p).ok())
            .collect()
    }

    async fn wait_for_log(dir: &Path, needle: &str) -> String {
        for _ in 0..100 {
            let content = read_all_logs(dir);
            if content.contains(needle) {
                return content;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("'{}' never appeared in {}", needle, dir.display());
    }

    #[tokio::test]
    async fn test_start_creates_dir_and_writes_startup_line() {
        let temp_dir = TempDir::new().unwrap();
        let logs_dir = temp_dir.path().join("app").join("logs");

        let service = LogService::start(test_config(logs_dir.clone())).await;

        assert!(logs_dir.is_dir());
        assert_eq!(service.logs_dir(), logs_dir.as_path());
        let content = read_all_logs(&logs_dir);
        assert!(content.contains("[INFO] LogService initialized successfully."));

        let active = service.active_log_file().unwrap();
        assert!(active
            .path
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("log-"));
    }

    #[tokio::test]
    async fn test_leveled_methods_write_lines() {
        let temp_dir = TempDir::new().unwrap();
        let service = LogService::start(test_config(temp_dir.path().to_path_buf())).await;

        service.debug("d-msg", Vec::new());
        service.info("i-msg", vec![json!("extra")]);
        service.warn("w-msg", vec![json!({"code": 1})]);
        service.error("e-msg", vec![json!(1), json!([2, 3])]);

        let content = read_all_logs(temp_dir.path());
        assert!(content.contains("[DEBUG] d-msg\n"));
        assert!(content.contains("[INFO] i-msg extra\n"));
        assert!(content.contains("[WARN] w-msg {\"code\":1}\n"));
        assert!(content.contains("[ERROR] e-msg 1 [2,3]\n"));
    }

    #[tokio::test]
    async fn test_bridge_warn_reaches_file() {
        let temp_dir = TempDir::new().unwrap();
        let service = LogService::start(test_config(temp_dir.path().to_path_buf())).await;

        let client = BridgeClient::new(service.bridge_addr().unwrap()).unwrap();
        client
            .send(&BridgeMessage::new(LogLevel::Warn, "hello", vec![json!({"code": 1})]))
            .await
            .unwrap();

        wait_for_log(temp_dir.path(), "[WARN] hello {\"code\":1}").await;
    }

    #[tokio::test]
    async fn test_in_process_bridge_sender() {
        let temp_dir = TempDir::new().unwrap();
        let service = LogService::start(test_config(temp_dir.path().to_path_buf())).await;

        let sender = service.bridge_sender().unwrap();
        assert!(sender.send(BridgeMessage::new(LogLevel::Error, "from queue", Vec::new())));

        wait_for_log(temp_dir.path(), "[ERROR] from queue").await;
    }

    #[tokio::test]
    async fn test_bridge_disabled() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            bridge_enabled: false,
            ..test_config(temp_dir.path().to_path_buf())
        };

        let service = LogService::start(config).await;

        assert!(service.bridge_addr().is_none());
        assert!(service.bridge_sender().is_none());
    }

    #[tokio::test]
    async fn test_bridge_bind_failure_is_logged() {
        let temp_dir = TempDir::new().unwrap();
        let occupied = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            bridge_port: occupied.local_addr().unwrap().port(),
            ..test_config(temp_dir.path().to_path_buf())
        };

        let service = LogService::start(config).await;

        assert!(service.bridge_addr().is_none());
        let content = read_all_logs(temp_dir.path());
        assert!(content.contains("[ERROR] Failed to start log bridge"));
        service.info("still logging", Vec::new());
        assert!(read_all_logs(temp_dir.path()).contains("still logging"));
    }

    #[tokio::test]
    async fn test_startup_sweep_removes_expired_files() {
        let temp_dir = TempDir::new().unwrap();
        let stale = temp_dir.path().join("log-2000-01-01.log");
        let unrelated = temp_dir.path().join("notes.txt");
        fs::write(&stale, "old\n").unwrap();
        fs::write(&unrelated, "keep\n").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let config = Config {
            retention_days: 0,
            ..test_config(temp_dir.path().to_path_buf())
        };
        let _service = LogService::start(config).await;

        assert!(!stale.exists());
        assert!(unrelated.exists());
    }

    #[tokio::test]
    async fn test_sweep_now_spares_active_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            retention_days: 0,
            ..test_config(temp_dir.path().to_path_buf())
        };
        let service = LogService::start(config).await;
        let active = service.active_log_file().unwrap().path;

        let stale = temp_dir.path().join("log-2000-01-01.log");
        fs::write(&stale, "old\n").unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = service.sweep_now().await;

        assert_eq!(report.deleted, vec![stale.clone()]);
        assert!(!stale.exists());
        assert!(active.exists());
    }

    #[tokio::test]
    async fn test_timer_sweeps_periodically() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            retention_days: 0,
            sweep_interval_secs: 1,
            ..test_config(temp_dir.path().to_path_buf())
        };
        let service = LogService::start(config).await;
        assert_eq!(service.retention_policy().sweep_interval, Duration::from_secs(1));

        let stale = temp_dir.path().join("log-2000-01-01.log");
        fs::write(&stale, "old\n").unwrap();

        for _ in 0..50 {
            if !stale.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn test_unwritable_dir_degrades_quietly() {
        let temp_dir = TempDir::new().unwrap();
        let blocker = temp_dir.path().join("file");
        fs::write(&blocker, "").unwrap();
        let config = Config {
            bridge_enabled: false,
            ..test_config(blocker.join("logs"))
        };

        let service = LogService::start(config).await;
        service.error("nowhere to go", Vec::new());

        assert!(!blocker.join("logs").exists());
    }

    #[tokio::test]
    async fn test_global_init_returns_single_instance() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config {
            bridge_enabled: false,
            ..test_config(temp_dir.path().to_path_buf())
        };

        let (a, b) = tokio::join!(init(config.clone()), init(config));

        assert!(Arc::ptr_eq(&a, &b));
        assert!(Arc::ptr_eq(&a, &global().unwrap()));
        assert_eq!(state(), ServiceState::Running);
    }
}
