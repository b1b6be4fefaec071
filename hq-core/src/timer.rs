use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::Instant;

/// Pending connection timers, ordered by deadline.
///
/// Entries are never removed eagerly; a connection that re-arms leaves its
/// old entry behind, and the owner compares the popped deadline against the
/// connection's current one to drop stale firings.
#[derive(Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<(Instant, u64)>>,
}

impl TimerQueue {
    pub fn arm(&mut self, at: Instant, conn_id: u64) {
        self.heap.push(Reverse((at, conn_id)));
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse((at, _))| *at)
    }

    /// Pop the earliest entry whose deadline has passed.
    pub fn pop_due(&mut self, now: Instant) -> Option<(Instant, u64)> {
        match self.heap.peek() {
            Some(Reverse((at, _))) if *at <= now => self.heap.pop().map(|Reverse(entry)| entry),
            _ => None,
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.heap.len()
    }
}
