/// Dual log buffers for the worker
///
/// A worker owns two independent [`LogBuffer`]s: the self log (events the
/// worker originates) and the listen log (messages heard on the inbound
/// topic). Both are append-only and expose indexed access so a shell can
/// re-render only the rows it has not drawn yet. Every append is mirrored to a
/// [`DiagnosticSink`] and followed by the buffer's own notification.
use chrono::{DateTime, Local};
use flume::Sender;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};
use strum::{Display, EnumIter};

use super::bus::WorkerToUi;

/// Log entry severity, in ascending order
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumIter,
    Serialize,
    Deserialize,
)]
#[strum(serialize_all = "UPPERCASE")]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

/// A single immutable log record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub severity: Severity,
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogEntry {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            severity,
            timestamp: Local::now(),
            message: message.into(),
        }
    }

    /// Timestamp as `<unix seconds>.<nanoseconds>`.
    pub fn stamp(&self) -> String {
        format!(
            "{}.{:09}",
            self.timestamp.timestamp(),
            self.timestamp.timestamp_subsec_nanos()
        )
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] [{}]: {}", self.severity, self.stamp(), self.message)
    }
}

/// Which of the two worker logs a buffer is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum LogChannel {
    /// Self-originated events
    Log,
    /// Messages received on the inbound topic
    Listen,
}

impl LogChannel {
    pub fn notification(self) -> WorkerToUi {
        match self {
            LogChannel::Log => WorkerToUi::LogUpdated,
            LogChannel::Listen => WorkerToUi::ListenLogUpdated,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogError {
    OutOfRange { index: usize, len: usize },
}

impl fmt::Display for LogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogError::OutOfRange { index, len } => {
                write!(f, "log index {index} out of range (row count {len})")
            }
        }
    }
}

impl std::error::Error for LogError {}

/// System-level diagnostic stream fed alongside every buffer append.
pub trait DiagnosticSink: Send + Sync {
    fn emit(&self, severity: Severity, text: &str);
}

/// Forwards diagnostics to the `log` facade.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogFacadeSink;

impl DiagnosticSink for LogFacadeSink {
    fn emit(&self, severity: Severity, text: &str) {
        match severity {
            Severity::Debug => log::debug!("{text}"),
            Severity::Info => log::info!("{text}"),
            Severity::Warn => log::warn!("{text}"),
            Severity::Error => log::error!("{text}"),
            // `log` has no level above error; keep fatal records filterable by target.
            Severity::Fatal => log::error!(target: "chatter::fatal", "FATAL: {text}"),
        }
    }
}

/// Ordered, append-only sequence of log entries
pub struct LogBuffer {
    channel: LogChannel,
    entries: Mutex<Vec<LogEntry>>,
    diagnostics: Arc<dyn DiagnosticSink>,
    notifier: Option<Sender<WorkerToUi>>,
}

impl LogBuffer {
    pub fn new(
        channel: LogChannel,
        diagnostics: Arc<dyn DiagnosticSink>,
        notifier: Sender<WorkerToUi>,
    ) -> Self {
        Self {
            channel,
            entries: Mutex::new(Vec::new()),
            diagnostics,
            notifier: Some(notifier),
        }
    }

    /// A buffer nobody observes, diagnostics going to the `log` facade.
    pub fn detached(channel: LogChannel) -> Self {
        Self {
            channel,
            entries: Mutex::new(Vec::new()),
            diagnostics: Arc::new(LogFacadeSink),
            notifier: None,
        }
    }

    pub fn channel(&self) -> LogChannel {
        self.channel
    }

    /// Append an entry; see [`append_log`]. Returns the new row's index.
    pub fn append(&self, severity: Severity, message: impl Into<String>) -> usize {
        append_log(self, severity, message)
    }

    pub fn row_count(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn entry_at(&self, index: usize) -> Result<LogEntry, LogError> {
        let entries = self.entries.lock();
        entries.get(index).cloned().ok_or(LogError::OutOfRange {
            index,
            len: entries.len(),
        })
    }

    /// Formatted row at `index`.
    pub fn row_at(&self, index: usize) -> Result<String, LogError> {
        self.entry_at(index).map(|entry| entry.to_string())
    }

    /// Snapshot of the whole buffer, in append order.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    /// Entries from `start` to the end; empty when `start` is past the end.
    pub fn entries_from(&self, start: usize) -> Vec<LogEntry> {
        let entries = self.entries.lock();
        entries.get(start..).map(<[LogEntry]>::to_vec).unwrap_or_default()
    }

    /// Formatted rows from `start` to the end.
    pub fn rows_from(&self, start: usize) -> Vec<String> {
        self.entries_from(start)
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

/// Append one record to `buffer`.
///
/// The entry is stored under the buffer's lock, so concurrent appends to the
/// same buffer never interleave. The diagnostic record and then the buffer's
/// notification follow once the lock is released; by then the entry is
/// already readable.
pub fn append_log(buffer: &LogBuffer, severity: Severity, message: impl Into<String>) -> usize {
    let entry = LogEntry::new(severity, message);
    let text = entry.message.clone();
    let index = {
        let mut entries = buffer.entries.lock();
        entries.push(entry);
        entries.len() - 1
    };
    buffer.diagnostics.emit(severity, &text);

    if let Some(notifier) = &buffer.notifier {
        if notifier.send(buffer.channel.notification()).is_err() {
            log::trace!("No observer for {} log updates", buffer.channel);
        }
    }
    index
}
