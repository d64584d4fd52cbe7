//! In-app log buffer surfaced to the user.
//!
//! Extension lifecycle events (activation failures, removals, update
//! verdicts) land here so the UI can show them; they also go to `tracing`
//! for operators. Entries live in a fixed-capacity circular buffer.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A single log entry stored in the ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: u64,
    pub timestamp_ms: i64,
    pub level: String,
    pub source: String,
    pub message: String,
}

pub const LOG_RING_CAPACITY: usize = 1000;

/// Fixed-capacity circular buffer for structured log entries.
struct LogRingBuffer {
    entries: Vec<Option<LogEntry>>,
    capacity: usize,
    /// Write position (wraps around)
    write_pos: usize,
    /// Number of entries currently stored (≤ capacity)
    count: usize,
    /// Monotonically increasing ID for the next entry
    next_id: u64,
}

impl LogRingBuffer {
    fn new(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || None);
        Self {
            entries,
            capacity,
            write_pos: 0,
            count: 0,
            next_id: 1,
        }
    }

    fn push(&mut self, level: String, source: String, message: String) -> u64 {
        let id = self.next_id;
        self.next_id += 1;

        let entry = LogEntry {
            id,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
            level,
            source,
            message,
        };

        self.entries[self.write_pos] = Some(entry);
        self.write_pos = (self.write_pos + 1) % self.capacity;
        if self.count < self.capacity {
            self.count += 1;
        }

        id
    }

    /// Return entries in chronological order (oldest first), up to `limit`
    /// most recent. `limit` 0 returns all entries.
    fn get_entries(&self, limit: usize) -> Vec<LogEntry> {
        if self.count == 0 {
            return Vec::new();
        }

        let effective_limit = if limit == 0 {
            self.count
        } else {
            limit.min(self.count)
        };

        // write_pos points to the oldest entry once the buffer is full
        let start = if self.count < self.capacity {
            0
        } else {
            self.write_pos
        };

        let skip = self.count - effective_limit;
        let mut result = Vec::with_capacity(effective_limit);
        for i in skip..self.count {
            let idx = (start + i) % self.capacity;
            if let Some(entry) = &self.entries[idx] {
                result.push(entry.clone());
            }
        }

        result
    }

    fn clear(&mut self) {
        for slot in self.entries.iter_mut() {
            *slot = None;
        }
        self.write_pos = 0;
        self.count = 0;
        // Keep next_id monotonic
    }

    fn len(&self) -> usize {
        self.count
    }
}

/// Shared handle to the application log.
pub struct AppLog {
    buffer: Mutex<LogRingBuffer>,
}

impl AppLog {
    pub fn new() -> Arc<Self> {
        Self::with_capacity(LOG_RING_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer: Mutex::new(LogRingBuffer::new(capacity)),
        })
    }

    pub fn info(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(source, "{message}");
        self.buffer
            .lock()
            .push("info".into(), source.into(), message);
    }

    pub fn warn(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(source, "{message}");
        self.buffer
            .lock()
            .push("warn".into(), source.into(), message);
    }

    pub fn error(&self, source: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(source, "{message}");
        self.buffer
            .lock()
            .push("error".into(), source.into(), message);
    }

    /// Up to `limit` most recent entries, oldest first (0 = all).
    pub fn entries(&self, limit: usize) -> Vec<LogEntry> {
        self.buffer.lock().get_entries(limit)
    }

    pub fn clear(&self) {
        self.buffer.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_monotonic_ids() {
        let mut buf = LogRingBuffer::new(10);
        let id1 = buf.push("info".into(), "app".into(), "first".into());
        let id2 = buf.push("warn".into(), "loader".into(), "second".into());
        let id3 = buf.push("error".into(), "app".into(), "third".into());

        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        assert_eq!(id3, 3);
    }

    #[test]
    fn get_entries_returns_chronological_order() {
        let mut buf = LogRingBuffer::new(10);
        buf.push("info".into(), "app".into(), "first".into());
        buf.push("warn".into(), "app".into(), "second".into());
        buf.push("error".into(), "app".into(), "third".into());

        let entries = buf.get_entries(0);
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "first");
        assert_eq!(entries[1].message, "second");
        assert_eq!(entries[2].message, "third");
    }

    #[test]
    fn get_entries_with_limit_returns_most_recent() {
        let mut buf = LogRingBuffer::new(10);
        buf.push("info".into(), "app".into(), "a".into());
        buf.push("info".into(), "app".into(), "b".into());
        buf.push("info".into(), "app".into(), "c".into());

        let entries = buf.get_entries(2);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "b");
        assert_eq!(entries[1].message, "c");
    }

    #[test]
    fn ring_buffer_wraps_and_drops_oldest() {
        let mut buf = LogRingBuffer::new(3);
        buf.push("info".into(), "app".into(), "a".into());
        buf.push("info".into(), "app".into(), "b".into());
        buf.push("info".into(), "app".into(), "c".into());
        buf.push("info".into(), "app".into(), "d".into());

        assert_eq!(buf.len(), 3);
        let entries = buf.get_entries(0);
        assert_eq!(entries[0].message, "b");
        assert_eq!(entries[1].message, "c");
        assert_eq!(entries[2].message, "d");
    }

    #[test]
    fn clear_removes_all_entries_but_keeps_next_id() {
        let mut buf = LogRingBuffer::new(10);
        buf.push("info".into(), "app".into(), "a".into());
        buf.push("info".into(), "app".into(), "b".into());

        buf.clear();
        assert_eq!(buf.len(), 0);

        let id = buf.push("info".into(), "app".into(), "after-clear".into());
        assert_eq!(id, 3);
    }

    #[test]
    fn app_log_records_levels_and_sources() {
        let log = AppLog::with_capacity(10);
        log.info("loader", "extension enabled");
        log.error("loader", "extension failed");

        let entries = log.entries(0);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].level, "info");
        assert_eq!(entries[1].level, "error");
        assert_eq!(entries[1].source, "loader");
        assert!(entries[1].timestamp_ms > 0);
    }
}
