//! The model-facing LP contract and the kernel-side bookkeeping wrapped
//! around each logical process.
pub mod input_queue;

use std::any::Any;

use crate::event::Event;

pub use input_queue::InputQueue;

/// An LP's private state. Must support a deep `clone()` (for
/// checkpointing) and an in-place `restore()` (for rollback).
///
/// Implementors typically derive `Clone` and rely on the blanket impl
/// below; the two methods are kept distinct from `Clone` itself so a model
/// that can restore more cheaply than a generic clone-and-overwrite (e.g.
/// swapping a `Box` instead of deep-copying its contents) can implement
/// `LPState` by hand instead.
pub trait LPState: Send {
    fn clone_state(&self) -> Box<dyn LPState>;
    fn restore(&mut self, other: &dyn LPState);
    fn as_any(&self) -> &dyn Any;
}

impl<T> LPState for T
where
    T: Clone + Send + 'static,
{
    fn clone_state(&self) -> Box<dyn LPState> {
        Box::new(self.clone())
    }

    fn restore(&mut self, other: &dyn LPState) {
        let other = other
            .as_any()
            .downcast_ref::<T>()
            .expect("restore() called with a state snapshot of a different type");
        self.clone_from(other);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A registered pseudo-random source whose internal generator state must be
/// snapshotted and restored alongside its LP's state (§4.D, and §5's
/// "RNG registration: per-LP, accessed only by the thread currently
/// executing that LP" shared-resource policy). The snapshot is an opaque
/// byte buffer -- the kernel never interprets it, only stores and replays
/// it verbatim.
pub trait RngState: Send {
    fn snapshot(&self) -> Vec<u8>;
    fn restore(&mut self, snapshot: &[u8]);
}

/// The model-author contract. A `LogicalProcess` is purely a function of
/// its state and the event it receives: it must not perform I/O except
/// through rollback-safe streams the kernel provides, and every event it
/// emits must have `receive_time >= ` the triggering event's `receive_time`
/// (checked by the worker loop, see [`crate::KernelError::CausalityViolation`]).
pub trait LogicalProcess: Send {
    /// Events scheduled once, before the simulation begins. The returned
    /// events' `receiver_lp` may name any LP, including this one.
    fn initial_events(&mut self, self_id: usize) -> Vec<Event> {
        let _ = self_id;
        Vec::new()
    }

    /// Process `event`, returning the events it causes. Called both for
    /// ordinary forward execution and for coast-forward re-execution during
    /// rollback recovery -- in the latter case the worker discards the
    /// returned events rather than sending them (see
    /// [`crate::worker::coast_forward`]).
    fn receive_event(&mut self, event: &Event) -> Vec<Event>;

    /// Borrow this LP's state for checkpointing/restoring.
    fn state(&mut self) -> &mut dyn LPState;

    /// Borrow this LP's state together with every RNG registered alongside
    /// it, for the state manager to snapshot/restore as one unit (§4.D).
    /// A single method rather than a separate `rngs()` accessor because the
    /// two borrows must be disjoint and only the implementor's own field
    /// layout can prove that to the borrow checker. Models with no RNGs to
    /// register never need to override this.
    fn state_and_rngs(&mut self) -> (&mut dyn LPState, Vec<&mut dyn RngState>) {
        (self.state(), Vec::new())
    }
}

/// Kernel-side bookkeeping for one LP: identity, the model object, and the
/// cursors described in the data model (`scheduled_event`, `straggler_event`
/// live in [`InputQueue`] since they are properties of the input queue, not
/// of the LP itself).
pub struct LpRuntime {
    pub id: usize,
    pub name: String,
    pub model: Box<dyn LogicalProcess>,
    pub last_processed_time: u64,
    generation_counter: u64,
}

impl LpRuntime {
    pub fn new(id: usize, name: impl Into<String>, model: Box<dyn LogicalProcess>) -> Self {
        Self {
            id,
            name: name.into(),
            model,
            last_processed_time: 0,
            generation_counter: 0,
        }
    }

    /// The next sender-local monotonic counter value, used to distinguish
    /// regenerated copies of an event after rollback.
    pub fn next_generation(&mut self) -> u64 {
        let g = self.generation_counter;
        self.generation_counter += 1;
        g
    }
}
