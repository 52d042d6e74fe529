//! The sent-event log and anti-message production, grounded on `warped2`'s
//! `OutputManager` (see `examples/original_source`).
use crate::event::Event;
use crate::KernelError;

struct OutputEntry {
    input_event: Event,
    output_event: Event,
}

/// One append-only log per LP of `(triggering event, emitted event)` pairs,
/// used to cancel speculative output on rollback and to fossil-collect
/// committed output.
///
/// `arena_hint` (from [`crate::config::KernelConfig::with_arenas`]'s
/// `anti_msg_arena_size`) pre-sizes each LP's log; it is a `Vec` capacity
/// hint, not a hard cap -- see `DESIGN.md` for why this stays `Vec`-backed
/// rather than a `mesocarp::logging::journal::Journal` arena.
pub struct OutputManager {
    lps: Vec<Vec<OutputEntry>>,
}

impl OutputManager {
    pub fn new(num_lps: usize, arena_hint: usize) -> Self {
        let mut lps = Vec::with_capacity(num_lps);
        lps.resize_with(num_lps, || Vec::with_capacity(arena_hint.max(1)));
        Self { lps }
    }

    /// Record that processing `input_event` caused `lp` to emit
    /// `output_event`.
    pub fn insert(&mut self, lp: usize, input_event: Event, output_event: Event) -> Result<(), KernelError> {
        let log = self.lps.get_mut(lp).ok_or(KernelError::UnknownLp(lp))?;
        log.push(OutputEntry {
            input_event,
            output_event,
        });
        Ok(())
    }

    /// Remove every entry whose triggering event is at or past `straggler`,
    /// returning their output events rebranded as anti-messages (Negative),
    /// in the order they must be dispatched.
    pub fn rollback(&mut self, lp: usize, straggler: &Event) -> Result<Vec<Event>, KernelError> {
        let log = self.lps.get_mut(lp).ok_or(KernelError::UnknownLp(lp))?;
        let mut antis = Vec::new();
        log.retain(|entry| {
            if &entry.input_event >= straggler {
                antis.push(entry.output_event.anti_message());
                false
            } else {
                true
            }
        });
        Ok(antis)
    }

    /// Drop every entry whose output event committed strictly before GVT.
    pub fn fossil_collect(&mut self, lp: usize, gvt: u64) -> Result<(), KernelError> {
        let log = self.lps.get_mut(lp).ok_or(KernelError::UnknownLp(lp))?;
        log.retain(|entry| entry.output_event.receive_time >= gvt);
        Ok(())
    }

    pub fn size(&self, lp: usize) -> usize {
        self.lps.get(lp).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Polarity;

    fn ev(recv: u64, sender: usize, gen: u64, pol: Polarity) -> Event {
        Event::new(0, sender, recv, 0, gen, pol, 0)
    }

    #[test]
    fn rollback_cancels_entries_at_or_after_straggler() {
        let mut mgr = OutputManager::new(1, 4);
        let in1 = ev(1, 9, 0, Polarity::Positive);
        let out1 = ev(2, 0, 0, Polarity::Positive);
        let in2 = ev(5, 9, 1, Polarity::Positive);
        let out2 = ev(6, 0, 1, Polarity::Positive);
        mgr.insert(0, in1, out1).unwrap();
        mgr.insert(0, in2, out2).unwrap();

        let straggler = ev(5, 9, 1, Polarity::Positive);
        let antis = mgr.rollback(0, &straggler).unwrap();
        assert_eq!(antis, vec![out2.anti_message()]);
        assert_eq!(mgr.size(0), 1); // out1's entry survives
    }

    #[test]
    fn fossil_collect_drops_committed_output_below_gvt() {
        let mut mgr = OutputManager::new(1, 4);
        mgr.insert(0, ev(1, 9, 0, Polarity::Positive), ev(2, 0, 0, Polarity::Positive))
            .unwrap();
        mgr.insert(0, ev(10, 9, 1, Polarity::Positive), ev(11, 0, 1, Polarity::Positive))
            .unwrap();
        mgr.fossil_collect(0, 5).unwrap();
        assert_eq!(mgr.size(0), 1);
    }
}
