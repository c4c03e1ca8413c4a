//! Retry queue — link states ordered by the time they may dial again.
//!
//! Entries are cheap references `(next_dial, dest, key)`. A state can be
//! queued more than once; the actor re-reads the state on pop and ignores
//! entries that no longer match.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RetryEntry {
    pub next_dial: Instant,
    pub dest_id: String,
    pub link_key: String,
}

#[derive(Debug, Default)]
pub struct RetryHeap {
    heap: BinaryHeap<Reverse<RetryEntry>>,
}

impl RetryHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, next_dial: Instant, dest_id: &str, link_key: &str) {
        self.heap.push(Reverse(RetryEntry {
            next_dial,
            dest_id: dest_id.to_string(),
            link_key: link_key.to_string(),
        }));
    }

    pub fn peek(&self) -> Option<&RetryEntry> {
        self.heap.peek().map(|Reverse(e)| e)
    }

    pub fn pop(&mut self) -> Option<RetryEntry> {
        self.heap.pop().map(|Reverse(e)| e)
    }

    /// Pop the earliest entry if it is due at `now`.
    pub fn pop_due(&mut self, now: Instant) -> Option<RetryEntry> {
        match self.peek() {
            Some(e) if e.next_dial <= now => self.pop(),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}
