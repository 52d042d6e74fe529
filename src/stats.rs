//! Per-LP and per-node event/rollback counters.
//!
//! Supplemented from `warped2`'s `TimeWarpStatistics`/`IndividualEventStatistics`
//! (see `examples/original_source`): the distilled spec names statistics
//! collection as an external collaborator, so this module only maintains the
//! counters -- formatting and file output belong to the surrounding binary.
use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters for one worker thread. Each worker owns one and updates
/// it without contention; aggregation happens in [`Statistics::snapshot`].
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub events_processed: AtomicU64,
    pub events_committed: AtomicU64,
    pub events_sent: AtomicU64,
    pub anti_messages_sent: AtomicU64,
    pub primary_rollbacks: AtomicU64,
    pub secondary_rollbacks: AtomicU64,
    pub coast_forward_events: AtomicU64,
}

impl WorkerStats {
    fn bump(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn record_processed(&self) {
        Self::bump(&self.events_processed, 1);
    }

    pub fn record_committed(&self, n: u64) {
        Self::bump(&self.events_committed, n);
    }

    pub fn record_sent(&self, n: u64) {
        Self::bump(&self.events_sent, n);
    }

    pub fn record_anti_messages(&self, n: u64) {
        Self::bump(&self.anti_messages_sent, n);
    }

    /// A rollback is "primary" if it was triggered directly by a straggler
    /// arriving at this LP, "secondary" if it cascaded from an anti-message
    /// this LP received while coasting forward from another rollback.
    pub fn record_rollback(&self, primary: bool) {
        if primary {
            Self::bump(&self.primary_rollbacks, 1);
        } else {
            Self::bump(&self.secondary_rollbacks, 1);
        }
    }

    pub fn record_coast_forward(&self, n: u64) {
        Self::bump(&self.coast_forward_events, n);
    }
}

/// A point-in-time readout of a [`WorkerStats`], safe to print or hand to a
/// host-supplied statistics collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub events_processed: u64,
    pub events_committed: u64,
    pub events_sent: u64,
    pub anti_messages_sent: u64,
    pub primary_rollbacks: u64,
    pub secondary_rollbacks: u64,
    pub coast_forward_events: u64,
}

impl StatsSnapshot {
    pub fn total_rollbacks(&self) -> u64 {
        self.primary_rollbacks + self.secondary_rollbacks
    }
}

impl From<&WorkerStats> for StatsSnapshot {
    fn from(w: &WorkerStats) -> Self {
        Self {
            events_processed: w.events_processed.load(Ordering::Relaxed),
            events_committed: w.events_committed.load(Ordering::Relaxed),
            events_sent: w.events_sent.load(Ordering::Relaxed),
            anti_messages_sent: w.anti_messages_sent.load(Ordering::Relaxed),
            primary_rollbacks: w.primary_rollbacks.load(Ordering::Relaxed),
            secondary_rollbacks: w.secondary_rollbacks.load(Ordering::Relaxed),
            coast_forward_events: w.coast_forward_events.load(Ordering::Relaxed),
        }
    }
}

impl std::ops::Add for StatsSnapshot {
    type Output = StatsSnapshot;
    fn add(self, other: StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            events_processed: self.events_processed + other.events_processed,
            events_committed: self.events_committed + other.events_committed,
            events_sent: self.events_sent + other.events_sent,
            anti_messages_sent: self.anti_messages_sent + other.anti_messages_sent,
            primary_rollbacks: self.primary_rollbacks + other.primary_rollbacks,
            secondary_rollbacks: self.secondary_rollbacks + other.secondary_rollbacks,
            coast_forward_events: self.coast_forward_events + other.coast_forward_events,
        }
    }
}

/// One [`WorkerStats`] per worker thread plus the handful of node-wide
/// counters that don't belong to any single worker (GVT cycles observed).
pub struct Statistics {
    pub workers: Vec<WorkerStats>,
    pub gvt_cycles: AtomicU64,
}

impl Statistics {
    pub fn new(num_workers: usize) -> Self {
        let mut workers = Vec::with_capacity(num_workers);
        workers.resize_with(num_workers, WorkerStats::default);
        Self {
            workers,
            gvt_cycles: AtomicU64::new(0),
        }
    }

    pub fn record_gvt_cycle(&self) {
        self.gvt_cycles.fetch_add(1, Ordering::Relaxed);
    }

    /// Sum every worker's counters into a single node-wide snapshot.
    pub fn snapshot(&self) -> StatsSnapshot {
        self.workers
            .iter()
            .map(StatsSnapshot::from)
            .fold(StatsSnapshot::default(), |acc, s| acc + s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_across_workers() {
        let stats = Statistics::new(2);
        stats.workers[0].record_processed();
        stats.workers[1].record_processed();
        stats.workers[0].record_rollback(true);
        stats.workers[1].record_rollback(false);

        let snap = stats.snapshot();
        assert_eq!(snap.events_processed, 2);
        assert_eq!(snap.total_rollbacks(), 2);
        assert_eq!(snap.primary_rollbacks, 1);
        assert_eq!(snap.secondary_rollbacks, 1);
    }
}
