//! The structured console: an append-only, run-scoped sequence of log lines.
//!
//! The console is the single surface every execution path writes to. The
//! scheduler clears it at the start of a run; the host controller and the
//! runtime bootstrapper append to it while a run is streaming. Consumers
//! observe it either by taking an ordered [`Console::snapshot`] or by
//! subscribing to the live entry stream.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use tokio::sync::broadcast;

/// Severity of a console line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogLevel {
    /// Regular output (`console.log`/`console.info`, interpreter stdout).
    Info,
    /// Warnings (`console.warn`, "nothing to run" notices).
    Warning,
    /// Errors (`console.error`, uncaught exceptions, interpreter stderr).
    Error,
    /// The computed value of a trailing expression in the Python path.
    Success,
}

impl LogLevel {
    /// Stable lowercase name, matching what the console UI renders.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One console line. Immutable once appended.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Monotonic identifier, used only for list-rendering identity.
    pub id: u64,
    /// Rendered text. Always pre-serialized, never a live reference.
    pub message: String,
    /// Severity of the line.
    pub level: LogLevel,
    /// Capture time at append.
    pub timestamp: SystemTime,
}

struct ConsoleInner {
    entries: Mutex<Vec<LogEntry>>,
    next_id: AtomicU64,
    updates: broadcast::Sender<LogEntry>,
}

/// The ordered collection of console lines for the current run.
///
/// Cloning is cheap and shares the underlying sequence; the scheduler owns
/// the only clone that clears it, producers only append.
#[derive(Clone)]
pub struct Console {
    inner: Arc<ConsoleInner>,
}

impl Console {
    /// Capacity of the live-update channel. Slow subscribers lag, they never
    /// block or fail an append.
    const UPDATE_BUFFER: usize = 256;

    /// Create an empty console.
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(Self::UPDATE_BUFFER);
        Self {
            inner: Arc::new(ConsoleInner {
                entries: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
                updates,
            }),
        }
    }

    /// Empty the sequence. Called at the start of every run.
    pub fn clear(&self) {
        self.inner.entries.lock().unwrap().clear();
    }

    /// Append a line at the given level.
    ///
    /// Total: mints a fresh id, captures the timestamp, pushes to the end of
    /// the sequence and notifies subscribers. Entries are rendered in append
    /// order; the console never reorders by timestamp.
    pub fn append(&self, message: impl Into<String>, level: LogLevel) -> LogEntry {
        let entry = LogEntry {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            message: message.into(),
            level,
            timestamp: SystemTime::now(),
        };
        self.inner.entries.lock().unwrap().push(entry.clone());
        // No receivers is fine; the console works without subscribers.
        let _ = self.inner.updates.send(entry.clone());
        entry
    }

    /// Ordered copy of the current entries.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        self.inner.entries.lock().unwrap().clone()
    }

    /// Subscribe to entries appended after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LogEntry> {
        self.inner.updates.subscribe()
    }

    /// Number of entries currently in the sequence.
    pub fn len(&self) -> usize {
        self.inner.entries.lock().unwrap().len()
    }

    /// Check whether the sequence is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Console {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Console").field("len", &self.len()).finish()
    }
}
