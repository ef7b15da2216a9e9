//! Count-bounded result batch.

use serde_json::Value;

/// Accumulates result values until a flush.
///
/// Time-based flushing is the caller's job; the buffer only knows about the
/// count threshold.
#[derive(Debug)]
pub struct BatchBuffer {
    items: Vec<Value>,
    max_count: usize,
}

impl BatchBuffer {
    /// A buffer that fills up at `max_count` items (at least 1).
    pub fn new(max_count: usize) -> Self {
        let max_count = max_count.max(1);
        Self {
            items: Vec::with_capacity(max_count.min(64)),
            max_count,
        }
    }

    /// Append `value`; returns the full batch when the threshold is reached.
    pub fn push(&mut self, value: Value) -> Option<Vec<Value>> {
        self.items.push(value);
        if self.items.len() >= self.max_count {
            Some(self.take())
        } else {
            None
        }
    }

    /// Remove and return the pending items, or `None` if there are none.
    pub fn drain(&mut self) -> Option<Vec<Value>> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.take())
        }
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    fn take(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.items)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
