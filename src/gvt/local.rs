//! Per-node local-GVT reduction: the asynchronous flag-and-counter variant
//! and the synchronous barrier variant described in §4.G, grounded on
//! `warped2`'s `TimeWarpLocalGVTManager` (see `examples/original_source`).
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Barrier;

use crate::config::GvtMode;

const UNSET: u64 = u64::MAX;

/// Reduces each worker's local virtual time into a single node-local
/// minimum. Both algorithms yield the same logical output: `min(in-flight
/// event time, min outbound send time)` across every worker.
pub struct LocalGvt {
    mode: GvtMode,
    num_workers: usize,

    // Asynchronous path.
    flag: AtomicUsize,
    started: AtomicBool,
    reported: Vec<AtomicBool>,

    // Shared by both paths.
    local_min: Vec<AtomicU64>,
    send_min: Vec<AtomicU64>,

    // Synchronous path.
    report_gvt: AtomicBool,
    barrier: Option<Barrier>,

    straggler_count: AtomicU64,
    rollback_count: AtomicU64,
}

impl LocalGvt {
    pub fn new(num_workers: usize, mode: GvtMode) -> Self {
        let local_min = (0..num_workers).map(|_| AtomicU64::new(UNSET)).collect();
        let send_min = (0..num_workers).map(|_| AtomicU64::new(UNSET)).collect();
        let reported = (0..num_workers).map(|_| AtomicBool::new(false)).collect();
        let barrier = matches!(mode, GvtMode::Sync).then(|| Barrier::new(num_workers + 1));
        Self {
            mode,
            num_workers,
            flag: AtomicUsize::new(0),
            started: AtomicBool::new(false),
            reported,
            local_min,
            send_min,
            report_gvt: AtomicBool::new(false),
            barrier,
            straggler_count: AtomicU64::new(0),
            rollback_count: AtomicU64::new(0),
        }
    }

    pub fn mode(&self) -> GvtMode {
        self.mode
    }

    /// Called on every outbound send, in both modes: closes the
    /// "simultaneous reporting" race by constraining a worker's
    /// contribution even after it has already reported for this cycle.
    pub fn report_send(&self, tid: usize, receive_time: u64) {
        self.send_min[tid].fetch_min(receive_time, Ordering::SeqCst);
    }

    // ---- Asynchronous variant ----

    /// Manager: begin a new collection window.
    pub fn start_async_cycle(&self) {
        for r in &self.reported {
            r.store(false, Ordering::SeqCst);
        }
        self.flag.store(self.num_workers, Ordering::SeqCst);
        self.started.store(true, Ordering::SeqCst);
    }

    /// Worker: called at the top of every loop iteration with the
    /// timestamp of the event about to be dispatched.
    pub fn report_event_dispatch(&self, tid: usize, current_time: u64) {
        if self.flag.load(Ordering::SeqCst) == 0 {
            return;
        }
        if self.reported[tid].swap(true, Ordering::SeqCst) {
            return;
        }
        let send_min = self.send_min[tid].load(Ordering::SeqCst);
        self.local_min[tid].store(current_time.min(send_min), Ordering::SeqCst);
        self.flag.fetch_sub(1, Ordering::SeqCst);
    }

    /// Manager: non-blocking poll. `Some(gvt)` once every worker has
    /// reported for the current cycle.
    pub fn try_complete_async(&self) -> Option<u64> {
        if self.mode != GvtMode::Async || !self.started.load(Ordering::SeqCst) {
            return None;
        }
        if self.flag.load(Ordering::SeqCst) != 0 {
            return None;
        }
        let min = (0..self.num_workers)
            .map(|i| self.local_min[i].load(Ordering::SeqCst))
            .min()
            .unwrap_or(UNSET);
        for i in 0..self.num_workers {
            self.local_min[i].store(UNSET, Ordering::SeqCst);
            self.send_min[i].store(UNSET, Ordering::SeqCst);
        }
        self.started.store(false, Ordering::SeqCst);
        Some(min)
    }

    // ---- Synchronous variant ----

    /// Worker: called at a safe point every iteration. A no-op unless the
    /// manager has raised `report_gvt`.
    pub fn worker_sync_point(&self, tid: usize, current_time: u64) {
        if !self.report_gvt.load(Ordering::SeqCst) {
            return;
        }
        let send_min = self.send_min[tid].load(Ordering::SeqCst);
        self.local_min[tid].store(current_time.min(send_min), Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait();
            barrier.wait();
        }
    }

    /// Manager: raise the barrier, wait for every worker to report, reduce,
    /// then release workers with a second barrier.
    pub fn collect_sync(&self) -> u64 {
        self.report_gvt.store(true, Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait();
        }
        let min = (0..self.num_workers)
            .map(|i| self.local_min[i].load(Ordering::SeqCst))
            .min()
            .unwrap_or(UNSET);
        self.report_gvt.store(false, Ordering::SeqCst);
        for i in 0..self.num_workers {
            self.send_min[i].store(UNSET, Ordering::SeqCst);
        }
        if let Some(barrier) = &self.barrier {
            barrier.wait();
        }
        min
    }

    pub fn report_straggler(&self, _lp: usize) {
        self.straggler_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report_rollback(&self, _lp: usize) {
        self.rollback_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn async_cycle_reduces_to_minimum_across_workers() {
        let gvt = LocalGvt::new(3, GvtMode::Async);
        gvt.start_async_cycle();
        gvt.report_event_dispatch(0, 50);
        gvt.report_event_dispatch(1, 10);
        gvt.report_event_dispatch(2, 30);
        assert_eq!(gvt.try_complete_async(), Some(10));
    }

    #[test]
    fn async_cycle_incomplete_until_every_worker_reports() {
        let gvt = LocalGvt::new(2, GvtMode::Async);
        gvt.start_async_cycle();
        gvt.report_event_dispatch(0, 50);
        assert_eq!(gvt.try_complete_async(), None);
        gvt.report_event_dispatch(1, 10);
        assert_eq!(gvt.try_complete_async(), Some(10));
    }

    #[test]
    fn send_before_report_lowers_the_reported_minimum() {
        let gvt = LocalGvt::new(1, GvtMode::Async);
        gvt.start_async_cycle();
        gvt.report_send(0, 5);
        gvt.report_event_dispatch(0, 50);
        assert_eq!(gvt.try_complete_async(), Some(5));
    }

    #[test]
    fn a_second_report_attempt_is_ignored() {
        let gvt = LocalGvt::new(1, GvtMode::Async);
        gvt.start_async_cycle();
        gvt.report_event_dispatch(0, 50);
        gvt.report_event_dispatch(0, 1); // already reported this cycle
        assert_eq!(gvt.try_complete_async(), Some(50));
    }

    #[test]
    fn sync_round_trip_across_threads() {
        use std::sync::Arc;
        use std::thread;

        let gvt = Arc::new(LocalGvt::new(2, GvtMode::Sync));
        let mut handles = Vec::new();
        for (tid, ts) in [(0usize, 40u64), (1, 15)] {
            let gvt = Arc::clone(&gvt);
            handles.push(thread::spawn(move || {
                gvt.worker_sync_point(tid, ts);
            }));
        }
        let gvt_value = gvt.collect_sync();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(gvt_value, 15);
    }
}
