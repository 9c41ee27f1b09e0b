//! Console echo for the sink
//!
//! Mirrors records to stdout/stderr above a run-mode dependent level, and carries
//! the sink's own failure reports. Once the interceptor takes over fd 1 and 2 the
//! echo is pointed at duplicates of the original descriptors, so nothing written
//! here can come back through the interceptor.

use std::io::{self, Write};
use std::sync::Mutex;

use super::record::LogLevel;

type Stream = Box<dyn Write + Send>;

struct Streams {
    out: Stream,
    err: Stream,
}

/// Writes log lines and sink diagnostics to the console
pub struct ConsoleEcho {
    /// Lowest level mirrored to the console; `None` disables mirroring
    min_level: Option<LogLevel>,
    streams: Mutex<Streams>,
}

impl ConsoleEcho {
    /// Echo to the process's stdout and stderr
    pub fn new(min_level: Option<LogLevel>) -> Self {
        Self::with_streams(min_level, Box::new(io::stdout()), Box::new(io::stderr()))
    }

    /// Echo to arbitrary writers
    pub fn with_streams(min_level: Option<LogLevel>, out: Stream, err: Stream) -> Self {
        Self {
            min_level,
            streams: Mutex::new(Streams { out, err }),
        }
    }

    /// Lowest level mirrored to the console
    pub fn min_level(&self) -> Option<LogLevel> {
        self.min_level
    }

    /// Mirror a formatted line if its level passes the console filter
    ///
    /// Warnings and errors go to stderr, everything else to stdout.
    pub fn echo(&self, level: LogLevel, line: &str) {
        match self.min_level {
            Some(min) if level >= min => {}
            _ => return,
        }
        if let Ok(mut streams) = self.streams.lock() {
            let stream = if level.is_alert() {
                &mut streams.err
            } else {
                &mut streams.out
            };
            let _ = writeln!(stream, "{}", line);
            let _ = stream.flush();
        }
    }

    /// Report a failure of the logging pipeline itself
    ///
    /// Always written to stderr, regardless of the console filter.
    pub fn report(&self, message: &str) {
        if let Ok(mut streams) = self.streams.lock() {
            let _ = writeln!(streams.err, "[logkeeper] {}", message);
            let _ = streams.err.flush();
        }
    }

    /// Swap the underlying streams
    pub(crate) fn redirect(&self, out: Stream, err: Stream) {
        if let Ok(mut streams) = self.streams.lock() {
            let _ = streams.out.flush();
            let _ = streams.err.flush();
            *streams = Streams { out, err };
        }
    }
}
