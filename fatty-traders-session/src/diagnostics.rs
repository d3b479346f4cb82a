//! Timestamped diagnostic lines for presentation layers.
//!
//! Every line is also emitted through `tracing`, so a terminal subscriber and
//! a GUI-style log pane see the same text.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use parking_lot::Mutex;
use serde::Serialize;

/// One diagnostic line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LogLine {
    /// Monotonic per-log sequence number, starting at 1.
    pub seq: u64,
    pub timestamp: DateTime<Local>,
    pub message: String,
}

impl LogLine {
    /// `[HH:MM:SS] message`
    pub fn render(&self) -> String {
        format!("[{}] {}", self.timestamp.format("%H:%M:%S"), self.message)
    }
}

struct Ring {
    lines: VecDeque<LogLine>,
    next_seq: u64,
}

/// Bounded ring buffer of [`LogLine`]s. Oldest lines drop first.
pub struct DiagnosticLog {
    capacity: usize,
    ring: Mutex<Ring>,
}

impl DiagnosticLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ring: Mutex::new(Ring {
                lines: VecDeque::with_capacity(capacity),
                next_seq: 1,
            }),
        }
    }

    /// Appends a line and returns its sequence number.
    pub fn push(&self, message: impl Into<String>) -> u64 {
        let message = message.into();
        tracing::info!(target: "fatty_traders_session", "{message}");

        let mut ring = self.ring.lock();
        let seq = ring.next_seq;
        ring.next_seq += 1;
        if ring.lines.len() == self.capacity {
            ring.lines.pop_front();
        }
        ring.lines.push_back(LogLine {
            seq,
            timestamp: Local::now(),
            message,
        });
        seq
    }

    pub fn snapshot(&self) -> Vec<LogLine> {
        self.ring.lock().lines.iter().cloned().collect()
    }

    /// Lines with `seq > after`, oldest first.
    pub fn lines_since(&self, after: u64) -> Vec<LogLine> {
        self.ring
            .lock()
            .lines
            .iter()
            .filter(|l| l.seq > after)
            .cloned()
            .collect()
    }

    /// Sequence number of the newest line, 0 when empty.
    pub fn last_seq(&self) -> u64 {
        self.ring.lock().next_seq - 1
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_since_returns_only_newer_lines() {
        let log = DiagnosticLog::new(10);
        log.push("one");
        let mark = log.push("two");
        log.push("three");

        let newer = log.lines_since(mark);
        assert_eq!(newer.len(), 1);
        assert_eq!(newer[0].message, "three");
        assert_eq!(log.last_seq(), 3);
    }

    #[test]
    fn ring_drops_oldest_beyond_capacity() {
        let log = DiagnosticLog::new(2);
        log.push("a");
        log.push("b");
        log.push("c");

        let all = log.snapshot();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message, "b");
        assert_eq!(all[1].seq, 3);
    }

    #[test]
    fn render_prefixes_clock_time() {
        let log = DiagnosticLog::new(4);
        log.push("Connected");
        let line = &log.snapshot()[0];
        let rendered = line.render();
        assert!(rendered.starts_with('['));
        assert!(rendered.ends_with("] Connected"));
        assert_eq!(rendered.len(), "[00:00:00] Connected".len());
    }
}
