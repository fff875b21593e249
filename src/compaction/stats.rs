/*!
Per-level statistics describing the work compactions have performed.
*/

use std::time::Duration;

/// Statistics for compactions that wrote into one level.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct LevelCompactionStats {
    /// The cumulative wall-clock time spent compacting into this level.
    pub(crate) compaction_duration: Duration,

    /// The cumulative bytes read by compactions writing into this level.
    pub(crate) bytes_read: u64,

    /// The cumulative bytes written by compactions writing into this level.
    pub(crate) bytes_written: u64,
}

/// Crate-only methods
impl LevelCompactionStats {
    /// Fold another statistics record into this one.
    pub(crate) fn add_stats(&mut self, other: &LevelCompactionStats) {
        self.compaction_duration += other.compaction_duration;
        self.bytes_read += other.bytes_read;
        self.bytes_written += other.bytes_written;
    }

    /// Returns true if no work has been recorded.
    pub(crate) fn is_empty(&self) -> bool {
        self.compaction_duration.is_zero() && self.bytes_read == 0 && self.bytes_written == 0
    }
}
