//! Plugin activity history.
//!
//! A bounded, timestamped audit log of every load, execute and delete event.
//! The log is shared between the control context and analysis workers, so
//! it is internally synchronized.

use std::collections::VecDeque;

use chrono::{Local, NaiveDateTime, Timelike};
use parking_lot::Mutex;

use crate::plugin::{ManifestStore, PluginResult};

/// Default number of entries kept in memory.
pub const DEFAULT_HISTORY_CAPACITY: usize = 200;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A single history entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    /// Local time the entry was recorded, second precision.
    pub timestamp: NaiveDateTime,
    /// Human-readable description.
    pub message: String,
}

impl HistoryEntry {
    /// Create an entry stamped with the current local time.
    pub fn now(message: impl Into<String>) -> Self {
        let now = Local::now().naive_local();
        // Second precision, so entries survive a text round-trip.
        let timestamp = now.with_nanosecond(0).unwrap_or(now);
        Self { timestamp, message: message.into() }
    }

    /// Parse a persisted `[YYYY-MM-DD HH:MM:SS] message` line.
    pub fn parse(line: &str) -> Option<Self> {
        let rest = line.strip_prefix('[')?;
        let (stamp, message) = rest.split_once("] ")?;
        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self { timestamp, message: message.to_string() })
    }

    /// Render as `[YYYY-MM-DD HH:MM:SS] message`.
    pub fn to_line(&self) -> String {
        format!("[{}] {}", self.timestamp.format(TIMESTAMP_FORMAT), self.message)
    }
}

impl std::fmt::Display for HistoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_line())
    }
}

#[derive(Debug)]
struct Inner {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl Inner {
    fn trim(&mut self) {
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }
}

/// Bounded FIFO of history entries. Oldest entries are evicted first.
#[derive(Debug)]
pub struct HistoryLog {
    inner: Mutex<Inner>,
}

impl Default for HistoryLog {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl HistoryLog {
    /// Create an empty log holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self { inner: Mutex::new(Inner { entries: VecDeque::new(), capacity }) }
    }

    /// Append an informational entry.
    pub fn append(&self, message: impl Into<String>) {
        let entry = HistoryEntry::now(message);
        tracing::info!("{}", entry.message);
        self.push(entry);
    }

    /// Append an entry describing a failure.
    pub fn append_error(&self, message: impl Into<String>) {
        let entry = HistoryEntry::now(message);
        tracing::warn!("{}", entry.message);
        self.push(entry);
    }

    fn push(&self, entry: HistoryEntry) {
        let mut inner = self.inner.lock();
        inner.entries.push_back(entry);
        inner.trim();
    }

    /// Current capacity.
    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity
    }

    /// Change the capacity, evicting the oldest entries if needed.
    pub fn set_capacity(&self, capacity: usize) {
        let mut inner = self.inner.lock();
        inner.capacity = capacity;
        inner.trim();
    }

    /// Copy of the entries, oldest first.
    pub fn entries(&self) -> Vec<HistoryEntry> {
        self.inner.lock().entries.iter().cloned().collect()
    }

    /// Entries rendered as lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.inner.lock().entries.iter().map(HistoryEntry::to_line).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Remove every entry.
    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    /// Write the whole log to the store's history file.
    pub fn persist(&self, store: &ManifestStore) -> PluginResult<()> {
        store.write_history(&self.lines())
    }

    /// Replace the in-memory log with the persisted one.
    ///
    /// Lines that do not parse keep their text with the current time. Only
    /// the newest `capacity` entries are kept. Returns the number restored.
    pub fn restore(&self, store: &ManifestStore) -> PluginResult<usize> {
        let lines = store.read_history()?;
        let mut inner = self.inner.lock();
        inner.entries = lines
            .iter()
            .map(|line| HistoryEntry::parse(line).unwrap_or_else(|| HistoryEntry::now(line.as_str())))
            .collect();
        inner.trim();
        Ok(inner.entries.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_lines() {
        let log = HistoryLog::new(10);
        log.append("Loaded plugin: demo");

        let lines = log.lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("] Loaded plugin: demo"));
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let log = HistoryLog::new(3);
        for i in 0..5 {
            log.append(format!("event {i}"));
        }

        let messages: Vec<_> = log.entries().into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["event 2", "event 3", "event 4"]);
    }

    #[test]
    fn test_set_capacity_trims_immediately() {
        let log = HistoryLog::new(10);
        for i in 0..6 {
            log.append(format!("event {i}"));
        }

        log.set_capacity(2);
        assert_eq!(log.len(), 2);
        assert_eq!(log.entries()[0].message, "event 4");

        log.set_capacity(0);
        assert!(log.is_empty());
        log.append("dropped");
        assert!(log.is_empty());
    }

    #[test]
    fn test_parse_line() {
        let entry = HistoryEntry::parse("[2024-03-05 14:07:09] Deleted plugin: a] b").unwrap();
        assert_eq!(entry.message, "Deleted plugin: a] b");
        assert_eq!(entry.to_line(), "[2024-03-05 14:07:09] Deleted plugin: a] b");

        assert!(HistoryEntry::parse("no timestamp").is_none());
        assert!(HistoryEntry::parse("[yesterday] x").is_none());
    }

    #[test]
    fn test_persist_and_restore() {
        let temp_dir = TempDir::new().unwrap();
        let store = ManifestStore::open(temp_dir.path()).unwrap();

        let log = HistoryLog::new(10);
        log.append("one");
        log.append_error("two");
        log.persist(&store).unwrap();

        let restored = HistoryLog::new(10);
        assert_eq!(restored.restore(&store).unwrap(), 2);
        assert_eq!(restored.lines(), log.lines());
    }

    #[test]
    fn test_restore_respects_capacity() {
        let temp_dir = TempDir::new().unwrap();
        let store = ManifestStore::open(temp_dir.path()).unwrap();
        let lines: Vec<String> =
            (0..5).map(|i| format!("[2024-01-01 00:00:0{i}] event {i}")).collect();
        store.write_history(&lines).unwrap();

        let log = HistoryLog::new(2);
        assert_eq!(log.restore(&store).unwrap(), 2);
        assert_eq!(log.lines(), lines[3..].to_vec());
    }

    #[test]
    fn test_restore_keeps_unparsable_lines() {
        let temp_dir = TempDir::new().unwrap();
        let store = ManifestStore::open(temp_dir.path()).unwrap();
        store.write_history(&["legacy entry".to_string()]).unwrap();

        let log = HistoryLog::default();
        log.restore(&store).unwrap();
        assert_eq!(log.entries()[0].message, "legacy entry");
    }
}
