//! Global logging for bootplug.
//!
//! A `log` backend keeping the most recent messages in a ring buffer, so
//! the console can show them after the fact. With the `serial_log` feature
//! every message is mirrored to COM1 as it is logged.

use alloc::format;
use alloc::string::String;
use alloc::vec::Vec;

use log::{Level, LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

pub const MAX_LOG_ENTRIES: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub level: Level,
    pub message: String,
}

/// Fixed-capacity ring of log entries. When full, the oldest is overwritten.
struct Ring {
    entries: Vec<LogEntry>,
    /// Total entries ever written
    count: usize,
}

impl Ring {
    const fn new() -> Self {
        Self {
            entries: Vec::new(),
            count: 0,
        }
    }

    fn push(&mut self, entry: LogEntry) {
        let idx = self.count % MAX_LOG_ENTRIES;
        if idx < self.entries.len() {
            self.entries[idx] = entry;
        } else {
            self.entries.push(entry);
        }
        self.count += 1;
    }

    fn stored(&self) -> usize {
        self.count.min(MAX_LOG_ENTRIES)
    }

    /// The last `n` entries in chronological order.
    fn last_n(&self, n: usize) -> Vec<LogEntry> {
        let num = n.min(self.stored());
        let start = self.count - num;
        (start..self.count)
            .map(|i| self.entries[i % MAX_LOG_ENTRIES].clone())
            .collect()
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.count = 0;
    }
}

/// `log` backend writing into a ring buffer.
pub struct RingLogger {
    ring: Mutex<Ring>,
}

impl RingLogger {
    pub const fn new() -> Self {
        Self {
            ring: Mutex::new(Ring::new()),
        }
    }

    /// All stored entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        let ring = self.ring.lock();
        ring.last_n(ring.stored())
    }

    pub fn last_n(&self, n: usize) -> Vec<LogEntry> {
        self.ring.lock().last_n(n)
    }

    /// Entries currently stored (at most [`MAX_LOG_ENTRIES`]).
    pub fn log_count(&self) -> usize {
        self.ring.lock().stored()
    }

    /// Entries ever logged.
    pub fn total_log_count(&self) -> usize {
        self.ring.lock().count
    }

    pub fn clear(&self) {
        self.ring.lock().clear();
    }
}

impl Default for RingLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Log for RingLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = format!("{}", record.args());

        #[cfg(feature = "serial_log")]
        {
            use core::fmt::Write;
            let _ = writeln!(
                crate::serial::SerialWriter,
                "{:<5} {}\r",
                record.level(),
                message
            );
        }

        self.ring.lock().push(LogEntry {
            level: record.level(),
            message,
        });
    }

    fn flush(&self) {}
}

static LOGGER: RingLogger = RingLogger::new();

/// Install the ring logger as the global `log` backend.
pub fn init(level: LevelFilter) -> Result<(), SetLoggerError> {
    log::set_logger(&LOGGER)?;
    log::set_max_level(level);
    Ok(())
}

/// Whether the ring logger is the global `log` backend.
pub fn is_installed() -> bool {
    let active = log::logger() as *const dyn Log as *const ();
    core::ptr::eq(active, &LOGGER as *const RingLogger as *const ())
}

pub fn snapshot() -> Vec<LogEntry> {
    LOGGER.snapshot()
}

/// Get the last N log entries (up to MAX_LOG_ENTRIES)
pub fn last_n(n: usize) -> Vec<LogEntry> {
    LOGGER.last_n(n)
}

pub fn log_count() -> usize {
    LOGGER.log_count()
}

pub fn total_log_count() -> usize {
    LOGGER.total_log_count()
}

pub fn clear() {
    LOGGER.clear()
}
