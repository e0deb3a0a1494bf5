//! Round History
//!
//! Bounded, most-recent-first record of finished rounds.
//! Entries are never edited once inserted; the oldest entry is evicted when
//! the capacity is exceeded.

use std::collections::VecDeque;
use serde::{Serialize, Deserialize};

/// Default number of finished rounds kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10;

/// Outcome of one finished round.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Multiplier the round crashed at.
    pub crash_point: f64,
    /// Wall-clock time of the crash (Unix milliseconds).
    pub ended_at: i64,
}

/// Append-only ring of the latest round outcomes.
#[derive(Debug, Clone)]
pub struct RoundHistory {
    entries: VecDeque<HistoryEntry>,
    capacity: usize,
}

impl RoundHistory {
    /// Create an empty history holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Record a finished round as the newest entry.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    /// Entries, newest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        self.entries.iter()
    }

    /// Newest entry, if any round has finished.
    pub fn latest(&self) -> Option<&HistoryEntry> {
        self.entries.front()
    }

    /// Number of entries held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no round has finished yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries held.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RoundHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
