use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
}

/// Append-only stream of user-visible diagnostics.
///
/// Handles are cheap to clone and share the same buffer. Every entry is also
/// forwarded to `tracing` so it shows up in the process log when verbose.
#[derive(Debug, Clone, Default)]
pub struct DebugLog {
    entries: Arc<Mutex<Vec<LogEntry>>>,
}

impl DebugLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn info(&self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    pub fn success(&self, message: impl Into<String>) {
        self.push(LogLevel::Success, message.into());
    }

    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries.lock().clone()
    }

    pub fn entries_at(&self, level: LogLevel) -> Vec<LogEntry> {
        self.entries
            .lock()
            .iter()
            .filter(|entry| entry.level == level)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    fn push(&self, level: LogLevel, message: String) {
        match level {
            LogLevel::Info | LogLevel::Success => info!("{}", message),
            LogLevel::Warn => warn!("{}", message),
            LogLevel::Error => error!("{}", message),
        }
        let timestamp = OffsetDateTime::now_utc()
            .format(&Rfc3339)
            .unwrap_or_default();
        self.entries.lock().push(LogEntry {
            timestamp,
            level,
            message,
        });
    }
}

pub fn format_entries(entries: &[LogEntry]) -> String {
    entries
        .iter()
        .map(|entry| {
            format!(
                "[{}] {:<7} {}",
                entry.timestamp,
                entry.level.as_str().to_uppercase(),
                entry.message
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_keep_order_and_level() {
        let log = DebugLog::new();
        log.info("first");
        log.warn("second");
        log.success("third");
        let entries = log.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].level, LogLevel::Warn);
        assert_eq!(entries[2].level, LogLevel::Success);
        assert!(!entries[0].timestamp.is_empty());
    }

    #[test]
    fn clones_share_the_buffer_and_clear_empties_it() {
        let log = DebugLog::new();
        let other = log.clone();
        other.error("boom");
        assert_eq!(log.entries_at(LogLevel::Error).len(), 1);
        log.clear();
        assert!(other.is_empty());
    }

    #[test]
    fn formatted_entries_include_level() {
        let log = DebugLog::new();
        log.warn("remote translation failed");
        let text = format_entries(&log.entries());
        assert!(text.contains("WARN"));
        assert!(text.contains("remote translation failed"));
    }
}
