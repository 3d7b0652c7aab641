// src/logs.rs
//
// =============================================================================
// SAXSFLOW: WORKFLOW MESSAGE LOG (v 0.1 )
// =============================================================================
//
// A thread-safe circular buffer holding the messages operations emit while
// a workflow runs. One buffer per workflow; readers take snapshots.

use chrono::Local;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

#[derive(Debug, Clone)]
pub struct LogBuffer {
    // Protected by Mutex for concurrent writes (ops) and reads (callers)
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl LogBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Adds a line, dropping the oldest if full.
    pub fn push(&self, source: &str, msg: &str) {
        let timestamp = Local::now().format("%H:%M:%S");
        let mut lines = self.lines.lock().unwrap_or_else(PoisonError::into_inner);
        if lines.len() >= self.capacity {
            lines.pop_front();
        }
        lines.push_back(format!("[{} {}] {}", timestamp, source, msg));
    }

    /// Snapshot of current lines, oldest first.
    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.lines
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drops_oldest_when_full() {
        let buf = LogBuffer::new(2);
        buf.push("a", "one");
        buf.push("a", "two");
        buf.push("b", "three");
        let lines = buf.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with("a] two"));
        assert!(lines[1].ends_with("b] three"));
    }
}
