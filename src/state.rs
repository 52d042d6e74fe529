//! Periodic per-LP state checkpointing, grounded on `warped2`'s
//! `PeriodicStateManager` (see `examples/original_source`).
use crate::lp::{LPState, RngState};
use crate::KernelError;

struct Checkpoint {
    time: u64,
    state: Box<dyn LPState>,
    /// Snapshots of every RNG registered for this LP at save time, in
    /// registration order; see [`StateManager::restore`] for the reverse-
    /// order consumption rule.
    rng_snapshots: Vec<Vec<u8>>,
}

struct LpCheckpoints {
    period: u64,
    counter: u64,
    entries: Vec<Checkpoint>,
}

impl LpCheckpoints {
    fn new(period: u64, arena_hint: usize, initial_state: Box<dyn LPState>, rng_snapshots: Vec<Vec<u8>>) -> Self {
        let mut entries = Vec::with_capacity(arena_hint.max(1));
        entries.push(Checkpoint {
            time: 0,
            state: initial_state,
            rng_snapshots,
        });
        Self {
            period,
            counter: 0,
            entries,
        }
    }
}

/// Per-LP checkpoint history: a deep clone of the LP's state plus a
/// snapshot of every RNG it has registered (§4.D), taken every `period`
/// processed events and consulted on rollback.
///
/// `arena_hint` (from [`crate::config::KernelConfig::with_arenas`]'s
/// `state_arena_size`) only pre-sizes each LP's checkpoint history so
/// ordinary-length runs avoid repeated reallocation; it is not a hard cap
/// -- a checkpoint history must always be able to grow past it; see
/// `DESIGN.md` for why this is a `Vec` pre-allocation hint rather than a
/// `mesocarp::logging::journal::Journal` arena.
pub struct StateManager {
    lps: Vec<LpCheckpoints>,
}

impl StateManager {
    pub fn new(period: u64, arena_hint: usize, initial: Vec<(Box<dyn LPState>, Vec<Vec<u8>>)>) -> Self {
        let lps = initial
            .into_iter()
            .map(|(s, r)| LpCheckpoints::new(period.max(1), arena_hint, s, r))
            .collect();
        Self { lps }
    }

    /// Save `state` plus a snapshot of every entry in `rngs`, keyed by
    /// `time`, if the per-LP save counter has reached zero. Returns whether
    /// a checkpoint was actually taken.
    pub fn save(
        &mut self,
        lp: usize,
        time: u64,
        state: &dyn LPState,
        rngs: &mut [&mut dyn RngState],
    ) -> Result<bool, KernelError> {
        let entry = self.lps.get_mut(lp).ok_or(KernelError::UnknownLp(lp))?;
        if entry.counter == 0 {
            let rng_snapshots = rngs.iter().map(|r| r.snapshot()).collect();
            entry.entries.push(Checkpoint {
                time,
                state: state.clone_state(),
                rng_snapshots,
            });
            entry.counter = entry.period;
            Ok(true)
        } else {
            entry.counter -= 1;
            Ok(false)
        }
    }

    /// Restore `target` and every entry in `rngs` to the greatest
    /// checkpoint strictly before `rollback_time`, returning that
    /// checkpoint's time. RNGs are restored in the reverse of the order
    /// they were registered (the order `rngs` is passed in), per §4.D.
    pub fn restore(
        &mut self,
        lp: usize,
        rollback_time: u64,
        target: &mut dyn LPState,
        rngs: &mut [&mut dyn RngState],
    ) -> Result<u64, KernelError> {
        let entry = self.lps.get_mut(lp).ok_or(KernelError::UnknownLp(lp))?;
        entry.entries.retain(|c| c.time < rollback_time);
        let checkpoint = entry.entries.last().ok_or(KernelError::EmptyStateQueue(lp))?;
        target.restore(checkpoint.state.as_ref());
        for (rng, snapshot) in rngs.iter_mut().rev().zip(checkpoint.rng_snapshots.iter().rev()) {
            rng.restore(snapshot);
        }
        // Reset the save cadence: the next processed event after a rollback
        // should be checkpointed fresh rather than inheriting a stale count.
        entry.counter = 0;
        Ok(checkpoint.time)
    }

    /// Drop every checkpoint strictly before the greatest one at or below
    /// `gvt` (invariant 3: the state queue never drops its sole remaining
    /// entry at or below GVT).
    pub fn fossil_collect(&mut self, lp: usize, gvt: u64) -> Result<(), KernelError> {
        let entry = self.lps.get_mut(lp).ok_or(KernelError::UnknownLp(lp))?;
        let keep_from = entry
            .entries
            .iter()
            .rposition(|c| c.time <= gvt)
            .unwrap_or(0);
        entry.entries.drain(0..keep_from);
        Ok(())
    }

    pub fn checkpoint_count(&self, lp: usize) -> usize {
        self.lps.get(lp).map_or(0, |e| e.entries.len())
    }
}
