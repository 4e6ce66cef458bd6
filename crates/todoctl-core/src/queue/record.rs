//! Delayed queue entry.

use std::cmp::Ordering;
use tokio::time::Instant;

use crate::domain::ObjectKey;

/// `(key, not-before, attempt count)` for a key waiting on `add_after`.
///
/// Ordered so that `BinaryHeap<DelayedEntry>` pops the earliest deadline
/// first; `seq` breaks ties in insertion order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedEntry {
    pub key: ObjectKey,
    pub not_before: Instant,
    pub attempts: u32,
    pub(crate) seq: u64,
}

impl DelayedEntry {
    pub fn is_due(&self, now: Instant) -> bool {
        self.not_before <= now
    }
}

impl PartialOrd for DelayedEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DelayedEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .not_before
            .cmp(&self.not_before)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
