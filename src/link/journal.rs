//! Log journal
//!
//! A capped ring buffer of per-device log lines. Everything appended here is
//! also forwarded to the `log` facade, so the journal is what a UI shows and
//! the regular log is what a developer reads.

use chrono::{DateTime, Utc};
use log::{log, Level};
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::camera::types::DeviceAddress;

/// One journal entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub at: DateTime<Utc>,
    pub level: Level,
    pub address: Option<DeviceAddress>,
    pub message: String,
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:<5} ", self.at.format("%H:%M:%S%.3f"), self.level)?;
        if let Some(address) = &self.address {
            write!(f, "[{}] ", address)?;
        }
        f.write_str(&self.message)
    }
}

/// Shared, capped log buffer; clones share the same buffer
#[derive(Debug, Clone)]
pub struct Journal {
    lines: Arc<Mutex<VecDeque<LogLine>>>,
    capacity: usize,
}

impl Journal {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn buffer(&self) -> MutexGuard<'_, VecDeque<LogLine>> {
        self.lines.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a line, evicting the oldest one when full
    pub fn record(&self, level: Level, address: Option<&DeviceAddress>, message: impl Into<String>) {
        let message = message.into();
        match address {
            Some(address) => log!(level, "[{}] {}", address, message),
            None => log!(level, "{}", message),
        }

        let mut lines = self.buffer();
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(LogLine {
            at: Utc::now(),
            level,
            address: address.cloned(),
            message,
        });
    }

    pub fn info(&self, address: &DeviceAddress, message: impl Into<String>) {
        self.record(Level::Info, Some(address), message);
    }

    pub fn warn(&self, address: &DeviceAddress, message: impl Into<String>) {
        self.record(Level::Warn, Some(address), message);
    }

    pub fn debug(&self, address: &DeviceAddress, message: impl Into<String>) {
        self.record(Level::Debug, Some(address), message);
    }

    /// All lines, newest first
    pub fn lines(&self) -> Vec<LogLine> {
        self.buffer().iter().rev().cloned().collect()
    }

    /// Lines of one device, newest first
    pub fn lines_for(&self, address: &DeviceAddress) -> Vec<LogLine> {
        self.buffer()
            .iter()
            .rev()
            .filter(|line| line.address.as_ref() == Some(address))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.buffer().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&self) {
        self.buffer().clear();
    }
}

impl Default for Journal {
    fn default() -> Self {
        Self::new(crate::camera::constants::DEFAULT_JOURNAL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_newest_first_and_capped() {
        let journal = Journal::new(3);
        let cam = DeviceAddress::from("AA:BB");
        for i in 0..5 {
            journal.info(&cam, format!("line {}", i));
        }

        let lines = journal.lines();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0].message, "line 4");
        assert_eq!(lines[2].message, "line 2");
    }

    #[test]
    fn test_filter_by_device() {
        let journal = Journal::new(10);
        let a = DeviceAddress::from("AA");
        let b = DeviceAddress::from("BB");
        journal.info(&a, "a1");
        journal.warn(&b, "b1");
        journal.record(Level::Info, None, "global");
        journal.debug(&a, "a2");

        let lines: Vec<_> = journal.lines_for(&a).into_iter().map(|l| l.message).collect();
        assert_eq!(lines, vec!["a2", "a1"]);
        assert_eq!(journal.len(), 4);
    }

    #[test]
    fn test_clones_share_buffer() {
        let journal = Journal::new(10);
        let other = journal.clone();
        other.info(&DeviceAddress::from("AA"), "hello");
        assert_eq!(journal.len(), 1);

        journal.clear();
        assert!(other.is_empty());
    }

    #[test]
    fn test_display_includes_address() {
        let journal = Journal::new(2);
        journal.warn(&DeviceAddress::from("AA:BB"), "write failed");
        let text = journal.lines()[0].to_string();
        assert!(text.contains("[AA:BB] write failed"));
        assert!(text.contains("WARN"));
    }
}
