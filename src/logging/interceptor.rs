//! Console interception
//!
//! Routes everything the process prints into the sink:
//! - `tracing` events via a global subscriber whose only output is [`SinkLayer`],
//! - raw writes to fd 1 and fd 2 (unix) via pipes read by forwarding threads.
//!
//! Installation swaps process-wide state and cannot be undone. It happens at
//! most once per process; later calls report [`InstallOutcome::AlreadyInstalled`].

use std::io::{self, BufRead, BufReader, Read};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use super::console::ConsoleEcho;
use super::record::{LogLevel, LogRecord};
use super::sink::LogWriter;

/// Filter for captured tracing events
///
/// The file keeps debug and above; chatty HTTP internals stay at info.
/// `RUST_LOG` is not consulted.
const TRACING_FILTER: &str =
    "debug,hyper=info,hyper_util=info,h2=info,reqwest=info,rustls=info,tower=info,axum=info";

/// Result of an install attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallOutcome {
    /// This call performed the installation
    Installed,
    /// An earlier call already did; nothing changed
    AlreadyInstalled,
}

/// Which console surfaces to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Install the global tracing subscriber
    pub tracing: bool,
    /// Redirect fd 1 and fd 2
    pub stdio: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            tracing: true,
            stdio: true,
        }
    }
}

/// One-shot installer for process-wide console capture
pub struct ConsoleInterceptor {
    installed: AtomicBool,
}

static PROCESS_INTERCEPTOR: ConsoleInterceptor = ConsoleInterceptor::new();

/// The stdio swap is guarded separately so that no interceptor instance can
/// wrap fd 1/2 twice.
static STDIO_REDIRECTED: AtomicBool = AtomicBool::new(false);

/// Set once fd 2 actually feeds the sink
static STDERR_CAPTURED: AtomicBool = AtomicBool::new(false);

/// Whether fd 2 is currently forwarded into the sink
pub fn stderr_captured() -> bool {
    STDERR_CAPTURED.load(Ordering::SeqCst)
}

impl ConsoleInterceptor {
    /// Create an interceptor in the not-installed state
    pub const fn new() -> Self {
        Self {
            installed: AtomicBool::new(false),
        }
    }

    /// The interceptor owned by the process
    pub fn process() -> &'static ConsoleInterceptor {
        &PROCESS_INTERCEPTOR
    }

    /// Whether `install` has run on this interceptor
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::SeqCst)
    }

    /// Capture the console surfaces selected in `options` into `writer`
    ///
    /// `console` is the echo attached to the sink; it is pointed at the
    /// original stdout/stderr before those descriptors are replaced, so the
    /// sink's own console output never re-enters the capture.
    pub fn install(
        &self,
        writer: Arc<dyn LogWriter>,
        console: &ConsoleEcho,
        options: CaptureOptions,
    ) -> InstallOutcome {
        if self.installed.swap(true, Ordering::SeqCst) {
            return InstallOutcome::AlreadyInstalled;
        }

        if options.stdio && !STDIO_REDIRECTED.swap(true, Ordering::SeqCst) {
            match stdio::redirect(Arc::clone(&writer), console) {
                Ok(()) => STDERR_CAPTURED.store(true, Ordering::SeqCst),
                Err(e) => {
                    console.report(&format!("Console capture of stdout/stderr unavailable: {}", e))
                }
            }
        }

        if options.tracing {
            let installed = tracing_subscriber::registry()
                .with(tracing_filter())
                .with(SinkLayer::new(writer))
                .try_init();
            if let Err(e) = installed {
                console.report(&format!("Tracing capture not installed: {}", e));
            }
        }

        InstallOutcome::Installed
    }
}

/// Filter applied to tracing events before they reach the sink
pub fn tracing_filter() -> EnvFilter {
    EnvFilter::new(TRACING_FILTER)
}

impl Default for ConsoleInterceptor {
    fn default() -> Self {
        Self::new()
    }
}

/// Tracing layer that forwards every event into a [`LogWriter`]
///
/// The `message` field becomes the record message; any other fields are
/// attached as one JSON object of metadata.
pub struct SinkLayer {
    writer: Arc<dyn LogWriter>,
}

impl SinkLayer {
    pub fn new(writer: Arc<dyn LogWriter>) -> Self {
        Self { writer }
    }
}

impl<S: Subscriber> Layer<S> for SinkLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);

        let mut metadata = Vec::new();
        if !visitor.fields.is_empty() {
            metadata.push(Value::Object(visitor.fields));
        }

        let level = LogLevel::from(*event.metadata().level());
        self.writer
            .write_record(LogRecord::new(level, visitor.message, metadata));
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: Map<String, Value>,
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields
                .insert(field.name().to_string(), Value::from(value));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.fields.insert(field.name().to_string(), Value::from(value));
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields
                .insert(field.name().to_string(), Value::from(format!("{:?}", value)));
        }
    }
}

/// Forward each line read from `reader` as a record at `level`
///
/// Runs until EOF or a read error. Blank lines are dropped, invalid UTF-8 is
/// replaced rather than rejected.
pub fn forward_lines<R: Read>(reader: R, level: LogLevel, writer: &dyn LogWriter) {
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(['\n', '\r']);
                if !line.is_empty() {
                    writer.write(level, line);
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        }
    }
}

#[cfg(unix)]
mod stdio {
    use std::fs::File;
    use std::io;
    use std::os::fd::{FromRawFd, RawFd};
    use std::sync::Arc;
    use std::thread;

    use super::forward_lines;
    use crate::logging::console::ConsoleEcho;
    use crate::logging::record::LogLevel;
    use crate::logging::sink::LogWriter;

    pub(super) fn redirect(writer: Arc<dyn LogWriter>, console: &ConsoleEcho) -> io::Result<()> {
        let original_out = dup(libc::STDOUT_FILENO)?;
        let original_err = dup(libc::STDERR_FILENO)?;
        console.redirect(Box::new(original_out), Box::new(original_err));

        capture(
            libc::STDOUT_FILENO,
            LogLevel::Info,
            "logkeeper-stdout",
            Arc::clone(&writer),
        )?;
        capture(libc::STDERR_FILENO, LogLevel::Error, "logkeeper-stderr", writer)
    }

    fn dup(fd: RawFd) -> io::Result<File> {
        let copy = unsafe { libc::dup(fd) };
        if copy < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(unsafe { File::from_raw_fd(copy) })
    }

    fn capture(
        target: RawFd,
        level: LogLevel,
        thread_name: &str,
        writer: Arc<dyn LogWriter>,
    ) -> io::Result<()> {
        let mut fds: [libc::c_int; 2] = [0; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        let (read_fd, write_fd) = (fds[0], fds[1]);

        if unsafe { libc::dup2(write_fd, target) } < 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::close(read_fd);
                libc::close(write_fd);
            }
            return Err(err);
        }
        // `target` now holds the write end
        unsafe { libc::close(write_fd) };

        let reader = unsafe { File::from_raw_fd(read_fd) };
        thread::Builder::new()
            .name(thread_name.to_string())
            .spawn(move || forward_lines(reader, level, writer.as_ref()))?;
        Ok(())
    }
}

#[cfg(not(unix))]
mod stdio {
    use std::io;
    use std::sync::Arc;

    use crate::logging::console::ConsoleEcho;
    use crate::logging::sink::LogWriter;

    pub(super) fn redirect(_writer: Arc<dyn LogWriter>, _console: &ConsoleEcho) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "stdio capture is only supported on unix",
        ))
    }
}
