//! Panic capture
//!
//! Records panics at error level before the previously installed hook runs.

use std::panic::{self, PanicInfo};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};

use super::interceptor::stderr_captured;
use super::record::{LogLevel, LogRecord};
use super::sink::LogWriter;

type PanicHook = Box<dyn Fn(&PanicInfo<'_>) + Send + Sync + 'static>;

static HOOK_INSTALLED: AtomicBool = AtomicBool::new(false);

/// Chain a panic hook that writes each panic into `writer`
///
/// While fd 2 is captured the previous hook is skipped: its report would come
/// back through the stderr forwarder as a second record, and the sink's echo
/// already shows the panic on the original stderr.
///
/// Returns `false` if a hook from this crate is already in place.
pub fn install_panic_hook(writer: Arc<dyn LogWriter>) -> bool {
    if HOOK_INSTALLED.swap(true, Ordering::SeqCst) {
        return false;
    }

    let previous = panic::take_hook();
    panic::set_hook(chain_hook(writer, previous, stderr_captured));
    true
}

fn chain_hook(
    writer: Arc<dyn LogWriter>,
    previous: PanicHook,
    stderr_captured: fn() -> bool,
) -> PanicHook {
    Box::new(move |info| {
        writer.write_record(panic_record(info));
        if !stderr_captured() {
            previous(info);
        }
    })
}

/// Build the record describing a panic
pub fn panic_record(info: &PanicInfo<'_>) -> LogRecord {
    let payload = info.payload();
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "Box<dyn Any>".to_string());

    let thread = std::thread::current();
    let mut details = json!({ "thread": thread.name().unwrap_or("<unnamed>") });
    if let (Some(location), Value::Object(map)) = (info.location(), &mut details) {
        map.insert(
            "location".to_string(),
            Value::from(format!("{}:{}:{}", location.file(), location.line(), location.column())),
        );
    }

    LogRecord::new(LogLevel::Error, format!("Panic: {}", message), vec![details])
}
