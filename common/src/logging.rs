// Low-latency background logger.
//
// Hot-path threads enqueue trivially-copyable entries into an SPSC ring; a
// dedicated writer thread drains, formats and writes. Formatting therefore
// never happens on a trading thread, and the enqueue path never allocates.
// When the ring is full the entry is dropped rather than blocking the
// producer.

use crate::lf_queue::LFQueue;
use crate::time::{now_nanos, Nanos};

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

const LOG_QUEUE_SIZE: usize = 8 * 1024;
/// The writer thread sleeps this long between empty drain passes.
const FLUSH_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug = 0,
    #[default]
    Info = 1,
    Warn = 2,
    Error = 3,
}

impl LogLevel {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

/// Payload of a log entry. Only static text plus scalar values, so entries
/// stay `Copy` and the enqueue path stays allocation-free; the writer thread
/// does the formatting.
#[derive(Clone, Copy, Default)]
pub enum LogText {
    #[default]
    Empty,
    Static(&'static str),
    WithU64(&'static str, u64),
    WithI64(&'static str, i64),
    WithF64(&'static str, f64),
    /// Two labelled values, e.g. "seq expected/received".
    WithU64Pair(&'static str, u64, u64),
}

impl LogText {
    fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        match self {
            LogText::Empty => Ok(()),
            LogText::Static(s) => write!(writer, "{}", s),
            LogText::WithU64(s, v) => write!(writer, "{}: {}", s, v),
            LogText::WithI64(s, v) => write!(writer, "{}: {}", s, v),
            LogText::WithF64(s, v) => write!(writer, "{}: {:.6}", s, v),
            LogText::WithU64Pair(s, a, b) => write!(writer, "{}: {}/{}", s, a, b),
        }
    }
}

#[derive(Clone, Copy, Default)]
pub struct LogEntry {
    pub timestamp: Nanos,
    pub level: LogLevel,
    pub text: LogText,
}

struct LoggerShared {
    queue: LFQueue<LogEntry, LOG_QUEUE_SIZE>,
    running: AtomicBool,
}

/// Per-component logger. Each component owns its own instance so the ring
/// keeps exactly one producer (the owning thread) and one consumer (the
/// background writer thread).
pub struct Logger {
    shared: Arc<LoggerShared>,
    writer_thread: Option<JoinHandle<()>>,
    min_level: LogLevel,
}

impl Logger {
    pub fn new() -> Self {
        Self::with_level(LogLevel::Info)
    }

    pub fn with_level(min_level: LogLevel) -> Self {
        let shared = Arc::new(LoggerShared {
            queue: LFQueue::new(),
            running: AtomicBool::new(true),
        });

        let writer_shared = Arc::clone(&shared);
        let writer_thread = thread::Builder::new()
            .name("logger".into())
            .spawn(move || Self::writer_loop(&writer_shared))
            .expect("failed to spawn logger thread");

        Self { shared, writer_thread: Some(writer_thread), min_level }
    }

    fn writer_loop(shared: &LoggerShared) {
        let mut stderr = std::io::stderr().lock();

        while shared.running.load(Ordering::Relaxed) {
            let drained = Self::drain(shared, &mut stderr);
            if drained == 0 {
                let _ = stderr.flush();
                thread::sleep(FLUSH_INTERVAL);
            }
        }

        // Final drain so shutdown messages are not lost.
        Self::drain(shared, &mut stderr);
        let _ = stderr.flush();
    }

    fn drain<W: Write>(shared: &LoggerShared, writer: &mut W) -> usize {
        let mut drained = 0;
        while let Some(entry) = shared.queue.next_to_read() {
            let _ = write!(writer, "[{:014}] {:5} ", entry.timestamp.as_u64(), entry.level.as_str());
            let _ = entry.text.write_to(writer);
            let _ = writeln!(writer);
            shared.queue.commit_read();
            drained += 1;
        }
        drained
    }

    /// Enqueues an entry, dropping it if the ring is full.
    #[inline]
    pub fn log(&self, level: LogLevel, text: LogText) {
        if level < self.min_level {
            return;
        }
        let _ = self.shared.queue.try_push(LogEntry { timestamp: now_nanos(), level, text });
    }

    /// Blocks until every entry enqueued before the call has been written.
    pub fn flush(&self) {
        while !self.shared.queue.is_empty() {
            thread::yield_now();
        }
    }

    #[inline]
    pub fn level(&self) -> LogLevel {
        self.min_level
    }

    #[inline]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.len()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.shared.running.store(false, Ordering::Release);
        if let Some(handle) = self.writer_thread.take() {
            let _ = handle.join();
        }
    }
}

#[macro_export]
macro_rules! log_debug {
    ($logger:expr, $msg:literal) => {
        $logger.log($crate::logging::LogLevel::Debug, $crate::logging::LogText::Static($msg))
    };
    ($logger:expr, $text:expr) => {
        $logger.log($crate::logging::LogLevel::Debug, $text)
    };
}

#[macro_export]
macro_rules! log_info {
    ($logger:expr, $msg:literal) => {
        $logger.log($crate::logging::LogLevel::Info, $crate::logging::LogText::Static($msg))
    };
    ($logger:expr, $text:expr) => {
        $logger.log($crate::logging::LogLevel::Info, $text)
    };
}

#[macro_export]
macro_rules! log_warn {
    ($logger:expr, $msg:literal) => {
        $logger.log($crate::logging::LogLevel::Warn, $crate::logging::LogText::Static($msg))
    };
    ($logger:expr, $text:expr) => {
        $logger.log($crate::logging::LogLevel::Warn, $text)
    };
}

#[macro_export]
macro_rules! log_error {
    ($logger:expr, $msg:literal) => {
        $logger.log($crate::logging::LogLevel::Error, $crate::logging::LogText::Static($msg))
    };
    ($logger:expr, $text:expr) => {
        $logger.log($crate::logging::LogLevel::Error, $text)
    };
}
