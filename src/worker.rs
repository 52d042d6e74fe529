//! The per-thread worker loop (§4.F): dequeue, detect/handle stragglers,
//! dispatch new events, and keep the input queue's cursors current. Grounded
//! on `warped2`'s main event loop (`TimeWarpEventDispatcher::processEvents`,
//! see `examples/original_source`) and on `aika`'s worker-thread shape
//! (`mt/optimistic/planet.rs::run`).
use tracing::{trace, warn};

use crate::comms::WireMessage;
use crate::event::Event;
use crate::kernel::{LockExt, Node};
use crate::lp::LPState;
use crate::stats::WorkerStats;
use crate::KernelError;

/// What happened during one pass through the loop body. The caller (the
/// thread's outer `loop {}`, owned by [`crate::kernel::Kernel`]) decides how
/// to react -- a brief backoff on `Idle`, nothing on `Processed`, and thread
/// exit on `Exit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Processed,
    Idle,
    Exit,
}

/// Re-execute `events` against `model` without sending their output anywhere.
/// Used to replay an LP's history after a rollback restores it to an earlier
/// checkpoint: the state transitions matter, the emitted events don't (they
/// were already sent the first time and are either still in flight, already
/// committed, or were cancelled along with the straggler that triggered this
/// rollback).
pub fn coast_forward(model: &mut dyn crate::lp::LogicalProcess, events: &[Event]) {
    for event in events {
        let _ = model.receive_event(event);
    }
}

/// Run one iteration of the worker loop for thread `tid`. Returns
/// [`StepOutcome::Exit`] once GVT has caught up with the configured time
/// horizon; the caller's job is to stop calling `step` on that node.
pub fn step(node: &Node, tid: usize, stats: &WorkerStats) -> Result<StepOutcome, KernelError> {
    if node.committed_gvt() >= node.config.max_sim_time {
        return Ok(StepOutcome::Exit);
    }

    let Some(ev) = node.schedule.pop_min()? else {
        // No work this iteration: still report, with an unconstraining
        // timestamp, so a GVT collection cycle waiting on every worker isn't
        // blocked by one with nothing queued.
        node.local_gvt.report_event_dispatch(tid, u64::MAX);
        node.local_gvt.worker_sync_point(tid, u64::MAX);
        return Ok(StepOutcome::Idle);
    };

    let lp_id = ev.receiver_lp;
    let cell = node.lp(lp_id)?;

    let has_straggler = cell.input.lock_poisoned()?.straggler_event().is_some();
    if has_straggler {
        handle_rollback(node, lp_id, tid, stats)?;
        return Ok(StepOutcome::Processed);
    }

    if ev.is_negative() {
        let next = cell.input.lock_poisoned()?.cancel_matched_pair(&ev);
        if let Some(next_ev) = next {
            node.schedule.insert(next_ev)?;
        }
        node.local_gvt.report_event_dispatch(tid, ev.receive_time);
        node.local_gvt.worker_sync_point(tid, ev.receive_time);
        return Ok(StepOutcome::Processed);
    }

    node.local_gvt.report_event_dispatch(tid, ev.receive_time);
    node.local_gvt.worker_sync_point(tid, ev.receive_time);

    let new_events = {
        let mut rt = cell.runtime.lock_poisoned()?;
        rt.last_processed_time = ev.receive_time;
        rt.model.receive_event(&ev)
    };

    for emitted in &new_events {
        if emitted.receive_time < ev.receive_time {
            return Err(KernelError::CausalityViolation {
                lp: lp_id,
                trigger_time: ev.receive_time,
                emitted_time: emitted.receive_time,
            });
        }
    }

    {
        let mut rt = cell.runtime.lock_poisoned()?;
        let (state_ref, mut rngs) = rt.model.state_and_rngs();
        node.state_mgr.lock_poisoned()?.save(lp_id, ev.receive_time, state_ref, &mut rngs)?;
    }

    let mut outbound = Vec::with_capacity(new_events.len());
    {
        let mut rt = cell.runtime.lock_poisoned()?;
        for mut emitted in new_events {
            emitted.sender_lp = lp_id;
            emitted.generation = rt.next_generation();
            emitted.send_time = ev.receive_time;
            outbound.push(emitted);
        }
    }

    for emitted in outbound {
        node.output_mgr.lock_poisoned()?.insert(lp_id, ev, emitted)?;
        node.local_gvt.report_send(tid, emitted.receive_time);
        stats.record_sent(1);
        dispatch(node, emitted)?;
    }

    {
        let mut q = cell.input.lock_poisoned()?;
        q.mark_processed(&ev);
        if let Some(next) = q.reschedule() {
            node.schedule.insert(next)?;
        }
    }

    stats.record_processed();
    trace!(lp = lp_id, time = ev.receive_time, "processed event");
    Ok(StepOutcome::Processed)
}

/// Send `event` either straight into the local LP's input queue or onto the
/// comms bridge for a remote node, per the partitioner's placement (§4.J).
fn dispatch(node: &Node, event: Event) -> Result<(), KernelError> {
    let target_node = node.partitioner.node_for(event.receiver_lp, node.num_nodes);
    if target_node == node.this_node {
        deliver_local(node, event)
    } else {
        let colour = {
            let mut m = node.mattern.lock_poisoned()?;
            m.on_send(event.receive_time);
            m.color()
        };
        node.comms.insert(WireMessage::Event(crate::comms::EventMessage {
            sender_node: node.this_node,
            receiver_node: target_node,
            event,
            colour,
        }));
        Ok(())
    }
}

/// Insert an event addressed to a local LP and react to what the input queue
/// reports (push to the schedule queue, or flag a straggler for the GVT
/// collector).
pub(crate) fn deliver_local(node: &Node, event: Event) -> Result<(), KernelError> {
    use crate::lp::input_queue::InsertOutcome;

    let lp_id = event.receiver_lp;
    let cell = node.lp(lp_id)?;
    let outcome = cell.input.lock_poisoned()?.insert(event)?;
    match outcome {
        InsertOutcome::BecameScheduled(ev) => node.schedule.insert(ev),
        InsertOutcome::BecameScheduledStraggler(ev) => {
            node.local_gvt.report_straggler(lp_id);
            node.schedule.insert(ev)
        }
        InsertOutcome::StragglerCandidate => {
            node.local_gvt.report_straggler(lp_id);
            Ok(())
        }
        InsertOutcome::Annihilated | InsertOutcome::Queued => Ok(()),
    }
}

/// The five-step rollback recovery for `lp` (§4.F / §5 invariant 4):
/// 1. pull the straggler out of the input queue
/// 2. cancel every output entry at or after it, producing anti-messages
/// 3. dispatch those anti-messages
/// 4. restore state to the last checkpoint strictly before the straggler
/// 5. coast-forward replay the events between that checkpoint and the
///    straggler, then reschedule
fn handle_rollback(node: &Node, lp_id: usize, tid: usize, stats: &WorkerStats) -> Result<(), KernelError> {
    let cell = node.lp(lp_id)?;

    let straggler = {
        let mut q = cell.input.lock_poisoned()?;
        q.take_straggler().expect("caller already checked straggler_event().is_some()")
    };

    node.local_gvt.report_rollback(lp_id);
    warn!(lp = lp_id, straggler = straggler.receive_time, "rolling back");

    // An anti-message straggler that reached here found its Positive
    // counterpart still sitting unprocessed as this LP's `scheduled_event`
    // (see `InputQueue::insert_negative`): remove the matched pair now so
    // neither is ever rescheduled, and evict the Positive's schedule-queue
    // footprint in case it is still there under a race with the ladder pop
    // that uncovered this straggler.
    if let Some(cancelled_positive) = cell.input.lock_poisoned()?.take_matched_pair(&straggler) {
        node.schedule.erase(&cancelled_positive)?;
    }

    let antis = node.output_mgr.lock_poisoned()?.rollback(lp_id, &straggler)?;
    stats.record_anti_messages(antis.len() as u64);
    for anti in antis {
        dispatch(node, anti)?;
    }

    let checkpoint_time = {
        let mut rt = cell.runtime.lock_poisoned()?;
        let (state_ref, mut rngs) = rt.model.state_and_rngs();
        node.state_mgr
            .lock_poisoned()?
            .restore(lp_id, straggler.receive_time, state_ref, &mut rngs)?
    };

    let replay = cell.input.lock_poisoned()?.collect_coast_events(checkpoint_time, &straggler);
    stats.record_coast_forward(replay.len() as u64);
    {
        let mut rt = cell.runtime.lock_poisoned()?;
        rt.last_processed_time = checkpoint_time;
        coast_forward(rt.model.as_mut(), &replay);
    }

    {
        // Everything at or after the straggler ran in an order that's no
        // longer valid and must be re-delivered; the straggler entry itself
        // is already unprocessed (only its cursor was cleared by
        // `take_straggler` above), so `reschedule` finds it again as the
        // lowest unprocessed entry and makes it the new `scheduled_event`.
        let mut q = cell.input.lock_poisoned()?;
        q.mark_unprocessed_from(&straggler);
        if let Some(next) = q.reschedule() {
            node.schedule.insert(next)?;
        }
    }

    node.local_gvt.report_event_dispatch(tid, straggler.receive_time);
    stats.record_rollback(true);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::config::{GvtMode, KernelConfig};
    use crate::event::Polarity;
    use crate::kernel::Kernel;
    use crate::lp::LogicalProcess;
    use crate::partition::RoundRobinPartitioner;

    fn single_node_config(horizon: u64) -> KernelConfig {
        KernelConfig::new(1, 1)
            .with_time_bound(horizon)
            .with_checkpoint_period(1)
            .with_gvt_cycle(10, GvtMode::Async)
            .with_arenas(64, 64)
    }

    /// Counts invocations of `receive_event`, including coast-forward
    /// replays, so tests can tell the difference between "processed once"
    /// and "replayed after a rollback".
    #[derive(Clone, Default, PartialEq, Debug)]
    struct Counter(u64);

    struct CountingLp(Counter);
    impl LogicalProcess for CountingLp {
        fn receive_event(&mut self, _event: &Event) -> Vec<Event> {
            self.0 .0 += 1;
            Vec::new()
        }
        fn state(&mut self) -> &mut dyn LPState {
            &mut self.0
        }
    }

    struct ChainLp {
        state: Counter,
        limit: u64,
    }
    impl LogicalProcess for ChainLp {
        fn initial_events(&mut self, self_id: usize) -> Vec<Event> {
            vec![Event::new(self_id, self_id, 0, 0, 0, Polarity::Positive, 0)]
        }
        fn receive_event(&mut self, event: &Event) -> Vec<Event> {
            self.state.0 += 1;
            if event.receive_time < self.limit {
                vec![Event::new(
                    event.receiver_lp,
                    event.receiver_lp,
                    event.receive_time + 1,
                    0,
                    0,
                    Polarity::Positive,
                    0,
                )]
            } else {
                Vec::new()
            }
        }
        fn state(&mut self) -> &mut dyn LPState {
            &mut self.state
        }
    }

    #[test]
    fn forward_chain_processes_every_event_once() {
        let kernel = Kernel::build(
            single_node_config(100),
            Box::new(RoundRobinPartitioner),
            vec![(
                "chain".to_string(),
                Box::new(ChainLp {
                    state: Counter(0),
                    limit: 3,
                }) as Box<dyn LogicalProcess>,
            )],
        )
        .unwrap();
        let node = Arc::clone(kernel.node());
        let stats = &node.stats.workers[0];

        // t=0,1,2,3 each emit the next, t=3 emits nothing.
        for _ in 0..4 {
            assert_eq!(step(&node, 0, stats).unwrap(), StepOutcome::Processed);
        }
        assert_eq!(step(&node, 0, stats).unwrap(), StepOutcome::Idle);
    }

    #[test]
    fn straggler_rolls_back_state_to_the_last_checkpoint_before_it() {
        let kernel = Kernel::build(
            single_node_config(100),
            Box::new(RoundRobinPartitioner),
            vec![("counter".to_string(), Box::new(CountingLp(Counter(0))) as Box<dyn LogicalProcess>)],
        )
        .unwrap();
        let node = Arc::clone(kernel.node());
        let stats = &node.stats.workers[0];

        deliver_local(&node, Event::new(0, 0, 5, 0, 0, Polarity::Positive, 0)).unwrap();
        deliver_local(&node, Event::new(0, 0, 10, 0, 1, Polarity::Positive, 0)).unwrap();
        assert_eq!(step(&node, 0, stats).unwrap(), StepOutcome::Processed); // t=5, count -> 1
        assert_eq!(step(&node, 0, stats).unwrap(), StepOutcome::Processed); // t=10, count -> 2

        // A straggler at t=7 arrives after both were processed and the
        // queue had gone idle; it must still reach the worker.
        deliver_local(&node, Event::new(0, 0, 7, 0, 2, Polarity::Positive, 0)).unwrap();
        assert_eq!(step(&node, 0, stats).unwrap(), StepOutcome::Processed); // rollback

        {
            let cell = node.lp(0).unwrap();
            let rt = cell.runtime.lock().unwrap();
            // Restored to the t=5 checkpoint (count=1); no events lay
            // strictly between t=5 and t=7, so nothing was coast-forwarded.
            assert_eq!(rt.model.state().as_any().downcast_ref::<Counter>(), Some(&Counter(1)));
        }

        // The straggler (t=7) is now the scheduled event; processing it
        // brings the count back to 2, then t=10 is still queued behind it.
        assert_eq!(step(&node, 0, stats).unwrap(), StepOutcome::Processed); // t=7
        assert_eq!(step(&node, 0, stats).unwrap(), StepOutcome::Processed); // t=10
        {
            let cell = node.lp(0).unwrap();
            let rt = cell.runtime.lock().unwrap();
            assert_eq!(rt.model.state().as_any().downcast_ref::<Counter>(), Some(&Counter(3)));
        }
    }

    #[test]
    fn anti_message_annihilates_its_positive_before_either_is_processed() {
        let kernel = Kernel::build(
            single_node_config(100),
            Box::new(RoundRobinPartitioner),
            vec![("counter".to_string(), Box::new(CountingLp(Counter(0))) as Box<dyn LogicalProcess>)],
        )
        .unwrap();
        let node = Arc::clone(kernel.node());
        let stats = &node.stats.workers[0];

        let pos = Event::new(0, 0, 5, 0, 0, Polarity::Positive, 0);
        deliver_local(&node, Event::new(0, 0, 1, 0, 7, Polarity::Positive, 0)).unwrap(); // becomes scheduled_event
        deliver_local(&node, pos).unwrap(); // queued behind it, not scheduled
        deliver_local(&node, pos.anti_message()).unwrap(); // annihilates `pos`

        assert_eq!(step(&node, 0, stats).unwrap(), StepOutcome::Processed); // only t=1 remains
        assert_eq!(step(&node, 0, stats).unwrap(), StepOutcome::Idle);
        let cell = node.lp(0).unwrap();
        let rt = cell.runtime.lock().unwrap();
        assert_eq!(rt.model.state().as_any().downcast_ref::<Counter>(), Some(&Counter(1)));
    }
}
