//! Kernel logging.
//!
//! A minimal print-style facility: messages are formatted and handed to a
//! pluggable sink. The bare-metal embedder points the sink at its serial
//! console; the host test harness points it at stdout. With no sink installed
//! logging is a no-op.

use crate::sync::SpinLock;
use alloc::boxed::Box;

/// Destination for formatted log lines.
pub trait LogSink: Send + Sync {
    /// Writes one complete line (no trailing newline).
    fn line(&self, s: &str);
}

static SINK: SpinLock<Option<Box<dyn LogSink>>> = SpinLock::new(None);

/// Installs the global log sink, replacing any previous one.
pub fn set_sink(sink: Box<dyn LogSink>) {
    *SINK.lock() = Some(sink);
}

#[doc(hidden)]
pub fn emit(args: core::fmt::Arguments) {
    let guard = SINK.lock();
    if let Some(sink) = guard.as_ref() {
        sink.line(&alloc::format!("{}", args));
    }
}

/// Logs an informational message.
#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {
        $crate::klog::emit(core::format_args!($($arg)*))
    };
}

/// Logs a debug message. Compiled out of release builds.
#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {
        if cfg!(debug_assertions) {
            $crate::klog::emit(core::format_args!($($arg)*))
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::{String, ToString};
    use alloc::sync::Arc;

    struct Capture(Arc<SpinLock<alloc::vec::Vec<String>>>);
    impl LogSink for Capture {
        fn line(&self, s: &str) {
            self.0.lock().push(s.to_string());
        }
    }

    #[test]
    fn sink_receives_lines() {
        let lines = Arc::new(SpinLock::new(alloc::vec::Vec::new()));
        set_sink(Box::new(Capture(lines.clone())));
        kinfo!("hello {}", 42);
        assert!(lines.lock().iter().any(|l| l == "hello 42"));
    }
}
