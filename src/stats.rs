// Poll statistics shared between the poll loop and readers

use std::sync::{PoisonError, RwLock};
use std::time::Duration;

/// Counters describing every poll since the monitor started
///
/// `successful_polls + failed_polls == total_polls` holds for every snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    pub total_polls: u64,
    pub successful_polls: u64,
    pub failed_polls: u64,

    /// Points returned by successful polls
    pub total_points: u64,

    /// How long the most recent poll took
    pub last_duration: Duration,
}

/// Thread-safe poll statistics
#[derive(Debug, Default)]
pub struct StatsTracker {
    stats: RwLock<PollStats>,
}

impl StatsTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the outcome of one poll
    pub fn record(&self, success: bool, point_count: usize, duration: Duration) {
        let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
        stats.total_polls += 1;
        if success {
            stats.successful_polls += 1;
            stats.total_points += point_count as u64;
        } else {
            stats.failed_polls += 1;
        }
        stats.last_duration = duration;
    }

    /// Returns a copy of the current counters
    pub fn snapshot(&self) -> PollStats {
        *self.stats.read().unwrap_or_else(PoisonError::into_inner)
    }
}
