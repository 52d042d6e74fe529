//! Per-LP pending-event set: an ordered multiset of positive and negative
//! events with straggler detection and anti-message matching, grounded on
//! `warped2`'s `TimeWarpEventSet` (see `examples/original_source`).
use crate::event::{Event, Polarity};
use crate::KernelError;

struct QueueEntry {
    event: Event,
    processed: bool,
}

/// What an LP's worker should do in response to an `insert()` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// The event and its matched anti-message annihilated; no schedule or
    /// straggler bookkeeping is needed.
    Annihilated,
    /// This event became the LP's `scheduled_event`; push it into the
    /// schedule queue.
    BecameScheduled(Event),
    /// This event became the LP's `scheduled_event` from an idle queue (no
    /// entry for this LP was already in flight in the schedule queue) *and*
    /// it is a straggler: something with a larger timestamp was already
    /// processed. Push it into the schedule queue *and* report it to the
    /// local GVT collector, or the worker will never learn the rollback is
    /// pending.
    BecameScheduledStraggler(Event),
    /// This event is now (or extends) the LP's straggler candidate, and an
    /// entry for this LP is already in flight in the schedule queue (so it
    /// will be discovered without an extra push); report it to the local
    /// GVT collector via `report_straggler`.
    StragglerCandidate,
    /// The event was recorded but requires no schedule-queue or straggler
    /// action.
    Queued,
}

/// The ordered pending-event set for one LP, plus the `scheduled_event` /
/// `straggler_event` cursors the worker loop reads every iteration.
pub struct InputQueue {
    lp: usize,
    entries: Vec<QueueEntry>,
    scheduled_event: Option<Event>,
    straggler_event: Option<Event>,
}

impl InputQueue {
    pub fn new(lp: usize) -> Self {
        Self {
            lp,
            entries: Vec::new(),
            scheduled_event: None,
            straggler_event: None,
        }
    }

    pub fn scheduled_event(&self) -> Option<Event> {
        self.scheduled_event
    }

    pub fn straggler_event(&self) -> Option<Event> {
        self.straggler_event
    }

    pub fn take_straggler(&mut self) -> Option<Event> {
        self.straggler_event.take()
    }

    fn insertion_index(&self, event: &Event) -> usize {
        self.entries.partition_point(|e| &e.event < event)
    }

    fn index_of(&self, event: &Event) -> Option<usize> {
        self.entries.iter().position(|e| e.event == *event)
    }

    /// The matching Positive counterpart of a Negative event is its
    /// immediate predecessor in the order (Positive sorts before Negative
    /// at equal identity).
    fn predecessor_positive(&self, negative: &Event) -> Option<usize> {
        let idx = self.insertion_index(negative);
        if idx == 0 {
            return None;
        }
        let candidate = &self.entries[idx - 1];
        if candidate.event.is_anti_pair_of(negative) {
            Some(idx - 1)
        } else {
            None
        }
    }

    fn update_straggler_candidate(&mut self, candidate: Event) {
        match self.straggler_event {
            Some(current) if candidate >= current => {}
            _ => self.straggler_event = Some(candidate),
        }
    }

    /// Insert `event` into the multiset and update the scheduled/straggler
    /// cursors per the insertion semantics of §4.B.
    pub fn insert(&mut self, event: Event) -> Result<InsertOutcome, KernelError> {
        match event.polarity {
            Polarity::Negative => self.insert_negative(event),
            Polarity::Positive => self.insert_positive(event),
        }
    }

    fn insert_negative(&mut self, event: Event) -> Result<InsertOutcome, KernelError> {
        let pos_idx = self.predecessor_positive(&event).ok_or(KernelError::ProtocolViolation {
            lp: self.lp,
            receive_time: event.receive_time,
        })?;
        let positive_event = self.entries[pos_idx].event;
        let positive_processed = self.entries[pos_idx].processed;
        let positive_is_scheduled = self.scheduled_event == Some(positive_event);

        if !positive_processed && !positive_is_scheduled {
            self.entries.remove(pos_idx);
            return Ok(InsertOutcome::Annihilated);
        }

        let idx = self.insertion_index(&event);
        self.entries.insert(
            idx,
            QueueEntry {
                event,
                processed: false,
            },
        );
        self.update_straggler_candidate(event);

        // If the positive was already processed and the queue had since gone
        // idle (`scheduled_event` cleared by `reschedule`), there is no
        // in-flight schedule-queue entry left for this LP to discover the
        // straggler through; this negative must be pushed itself.
        if self.scheduled_event.is_none() {
            self.scheduled_event = Some(event);
            return Ok(InsertOutcome::BecameScheduledStraggler(event));
        }
        Ok(InsertOutcome::StragglerCandidate)
    }

    fn insert_positive(&mut self, event: Event) -> Result<InsertOutcome, KernelError> {
        let idx = self.insertion_index(&event);
        self.entries.insert(
            idx,
            QueueEntry {
                event,
                processed: false,
            },
        );

        if self.scheduled_event.is_none() {
            self.scheduled_event = Some(event);
            // Initial event on an otherwise-empty queue is never a straggler;
            // but if a *larger* entry already sits past it, that entry was
            // necessarily already processed (the invariant that
            // `scheduled_event` is only `None` once every entry is
            // processed), so this is a genuine straggler re-opening an idle
            // queue and must be pushed to the schedule queue itself.
            let is_max_entry = idx == self.entries.len() - 1;
            if self.entries.len() > 1 && !is_max_entry {
                self.update_straggler_candidate(event);
                return Ok(InsertOutcome::BecameScheduledStraggler(event));
            }
            return Ok(InsertOutcome::BecameScheduled(event));
        }

        if event < self.scheduled_event.unwrap() {
            self.update_straggler_candidate(event);
            return Ok(InsertOutcome::StragglerCandidate);
        }

        Ok(InsertOutcome::Queued)
    }

    /// The smallest event not yet marked processed, if any.
    pub fn peek_lowest_unprocessed(&self) -> Option<Event> {
        self.entries.iter().find(|e| !e.processed).map(|e| e.event)
    }

    pub fn mark_processed(&mut self, event: &Event) {
        if let Some(idx) = self.index_of(event) {
            self.entries[idx].processed = true;
        }
    }

    /// Part of rollback recovery: every entry at or after `straggler` was
    /// executed in an order that is no longer valid (it ran before the
    /// straggler arrived, when it should have run after), so it must be
    /// re-delivered. Called once state has been restored, before the
    /// worker reschedules the LP.
    pub fn mark_unprocessed_from(&mut self, straggler: &Event) {
        for entry in &mut self.entries {
            if &entry.event >= straggler {
                entry.processed = false;
            }
        }
    }

    /// Remove a dequeued Negative event and its matched Positive, then pick
    /// the LP's new `scheduled_event`. Called from the worker loop's
    /// negative branch (§4.F).
    pub fn cancel_matched_pair(&mut self, negative: &Event) -> Option<Event> {
        if let Some(neg_idx) = self.index_of(negative) {
            if neg_idx > 0 && self.entries[neg_idx - 1].event.is_anti_pair_of(negative) {
                self.entries.remove(neg_idx);
                self.entries.remove(neg_idx - 1);
            } else {
                self.entries.remove(neg_idx);
            }
        }
        self.scheduled_event = None;
        self.reschedule()
    }

    /// Part of rollback recovery (§4.F step 1): if `straggler` is itself a
    /// Negative event, it arrived while its Positive counterpart was this
    /// LP's `scheduled_event` (still unprocessed), so the two were never
    /// annihilated at insertion time -- they just sat side by side until
    /// the rollback mechanism discovered the Negative via `straggler_event`.
    /// Remove both from the entry set here so the Positive is never
    /// rescheduled or coast-forwarded, and return it so the caller can also
    /// evict its schedule-queue footprint. A no-op (returns `None`) for a
    /// Positive straggler.
    pub fn take_matched_pair(&mut self, straggler: &Event) -> Option<Event> {
        if straggler.is_positive() {
            return None;
        }
        let neg_idx = self.index_of(straggler)?;
        let positive = if neg_idx > 0 && self.entries[neg_idx - 1].event.is_anti_pair_of(straggler) {
            Some(self.entries.remove(neg_idx - 1).event)
        } else {
            None
        };
        // The negative's own index shifts down by one if its predecessor
        // was just removed.
        let idx = if positive.is_some() { neg_idx - 1 } else { neg_idx };
        self.entries.remove(idx);
        positive
    }

    /// Pick the LP's next `scheduled_event`: the straggler if one is
    /// pending (it always wins, per §4.B), otherwise the smallest
    /// unprocessed entry.
    pub fn reschedule(&mut self) -> Option<Event> {
        let next = self.straggler_event.take().or_else(|| self.peek_lowest_unprocessed());
        self.scheduled_event = next;
        next
    }

    /// Remove every entry with `receive_time < t`, retaining the greatest
    /// entry still below `t` so coast-forward has an anchor.
    pub fn fossil_below(&mut self, t: u64) {
        let cut = self.entries.partition_point(|e| e.event.receive_time < t);
        if cut > 1 {
            self.entries.drain(0..cut - 1);
        }
    }

    /// Processed Positive events with `from_time < receive_time < to.receive_time`
    /// whose effects have not since been cancelled, in ascending order -- the
    /// set replayed by coast-forward. `from_time` is a bound rather than an
    /// `Event` because the state manager's time-0 checkpoint is synthetic
    /// (taken before any event exists).
    pub fn collect_coast_events(&self, from_time: u64, to: &Event) -> Vec<Event> {
        let mut out = Vec::new();
        for entry in &self.entries {
            if entry.event.receive_time <= from_time || entry.event >= *to {
                continue;
            }
            if entry.processed && entry.event.is_positive() {
                let cancelled = self
                    .entries
                    .iter()
                    .any(|other| other.event.is_anti_pair_of(&entry.event));
                if !cancelled {
                    out.push(entry.event);
                }
            }
        }
        out
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(recv: u64, send: u64, sender: usize, gen: u64, pol: Polarity) -> Event {
        Event::new(0, sender, recv, send, gen, pol, 0)
    }

    #[test]
    fn first_event_becomes_scheduled_without_straggler() {
        let mut q = InputQueue::new(0);
        let e = ev(10, 0, 1, 0, Polarity::Positive);
        assert_eq!(q.insert(e).unwrap(), InsertOutcome::BecameScheduled(e));
        assert_eq!(q.scheduled_event(), Some(e));
        assert!(q.straggler_event().is_none());
    }

    #[test]
    fn smaller_positive_while_scheduled_is_straggler() {
        let mut q = InputQueue::new(0);
        let first = ev(20, 0, 1, 0, Polarity::Positive);
        q.insert(first).unwrap();
        let smaller = ev(10, 0, 1, 1, Polarity::Positive);
        assert_eq!(q.insert(smaller).unwrap(), InsertOutcome::StragglerCandidate);
        assert_eq!(q.straggler_event(), Some(smaller));
        // scheduled_event is untouched until the worker handles the rollback.
        assert_eq!(q.scheduled_event(), Some(first));
    }

    #[test]
    fn straggler_candidate_keeps_the_minimum() {
        let mut q = InputQueue::new(0);
        q.insert(ev(20, 0, 1, 0, Polarity::Positive)).unwrap();
        q.insert(ev(15, 0, 1, 1, Polarity::Positive)).unwrap();
        q.insert(ev(10, 0, 1, 2, Polarity::Positive)).unwrap();
        assert_eq!(q.straggler_event(), Some(ev(10, 0, 1, 2, Polarity::Positive)));
        // A later, larger candidate must not replace the minimum.
        q.insert(ev(12, 0, 1, 3, Polarity::Positive)).unwrap();
        assert_eq!(q.straggler_event(), Some(ev(10, 0, 1, 2, Polarity::Positive)));
    }

    #[test]
    fn unmatched_negative_is_protocol_violation() {
        let mut q = InputQueue::new(0);
        let neg = ev(10, 0, 1, 0, Polarity::Negative);
        assert!(q.insert(neg).is_err());
    }

    #[test]
    fn anti_pair_annihilates_when_neither_processed_and_not_scheduled() {
        let mut q = InputQueue::new(0);
        q.insert(ev(5, 0, 1, 0, Polarity::Positive)).unwrap(); // scheduled_event
        let pos = ev(15, 0, 1, 1, Polarity::Positive);
        q.insert(pos).unwrap(); // queued, not scheduled (5 is smaller)
        let neg = pos.anti_message();
        assert_eq!(q.insert(neg).unwrap(), InsertOutcome::Annihilated);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn anti_pair_on_scheduled_positive_is_straggler() {
        let mut q = InputQueue::new(0);
        let pos = ev(5, 0, 1, 0, Polarity::Positive);
        q.insert(pos).unwrap(); // becomes scheduled_event
        let neg = pos.anti_message();
        assert_eq!(q.insert(neg).unwrap(), InsertOutcome::StragglerCandidate);
        assert_eq!(q.straggler_event(), Some(neg));
    }

    #[test]
    fn take_matched_pair_removes_both_entries_for_a_negative_straggler() {
        let mut q = InputQueue::new(0);
        let pos = ev(5, 0, 1, 0, Polarity::Positive);
        q.insert(pos).unwrap();
        let neg = pos.anti_message();
        q.insert(neg).unwrap();
        assert_eq!(q.len(), 2);

        let straggler = q.take_straggler().unwrap();
        assert_eq!(straggler, neg);
        assert_eq!(q.take_matched_pair(&straggler), Some(pos));
        assert_eq!(q.len(), 0);
        // Neither lingers to be rescheduled.
        assert_eq!(q.reschedule(), None);
    }

    #[test]
    fn take_matched_pair_is_a_no_op_for_a_positive_straggler() {
        let mut q = InputQueue::new(0);
        let straggler = ev(5, 0, 1, 0, Polarity::Positive);
        q.insert(straggler).unwrap();
        assert_eq!(q.take_matched_pair(&straggler), None);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn late_straggler_on_an_idle_queue_still_gets_scheduled() {
        let mut q = InputQueue::new(0);
        let a = ev(5, 0, 1, 0, Polarity::Positive);
        let b = ev(10, 0, 1, 1, Polarity::Positive);
        assert_eq!(q.insert(a).unwrap(), InsertOutcome::BecameScheduled(a));
        q.mark_processed(&a);
        assert_eq!(q.reschedule(), None);
        assert_eq!(q.insert(b).unwrap(), InsertOutcome::BecameScheduled(b));
        q.mark_processed(&b);
        assert_eq!(q.reschedule(), None);

        let straggler = ev(7, 0, 1, 2, Polarity::Positive);
        assert_eq!(
            q.insert(straggler).unwrap(),
            InsertOutcome::BecameScheduledStraggler(straggler)
        );
        assert_eq!(q.scheduled_event(), Some(straggler));
        assert_eq!(q.straggler_event(), Some(straggler));
    }

    #[test]
    fn fossil_below_retains_one_anchor() {
        let mut q = InputQueue::new(0);
        q.insert(ev(1, 0, 1, 0, Polarity::Positive)).unwrap();
        q.insert(ev(2, 0, 1, 1, Polarity::Positive)).unwrap();
        q.insert(ev(3, 0, 1, 2, Polarity::Positive)).unwrap();
        q.mark_processed(&ev(1, 0, 1, 0, Polarity::Positive));
        q.mark_processed(&ev(2, 0, 1, 1, Polarity::Positive));
        q.fossil_below(3);
        assert_eq!(q.len(), 2); // event at t=2 retained as anchor, plus t=3
    }

    #[test]
    fn coast_forward_skips_cancelled_positives() {
        let mut q = InputQueue::new(0);
        let checkpoint = ev(0, 0, 1, 0, Polarity::Positive);
        let survivor = ev(5, 0, 1, 1, Polarity::Positive);
        let cancelled = ev(8, 0, 1, 2, Polarity::Positive);
        let straggler = ev(20, 0, 1, 3, Polarity::Positive);
        q.insert(checkpoint).unwrap();
        q.mark_processed(&checkpoint);
        q.insert(survivor).unwrap();
        q.mark_processed(&survivor);
        q.insert(cancelled).unwrap();
        q.mark_processed(&cancelled);
        q.insert(straggler).unwrap();
        // Cancel `cancelled` with its anti-message, which stays in the queue.
        q.insert(cancelled.anti_message()).unwrap();

        let replay = q.collect_coast_events(checkpoint.receive_time, &straggler);
        assert_eq!(replay, vec![survivor]);
    }
}
