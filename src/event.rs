//! The immutable `Event` value and the total order shared by every queue in
//! the kernel (input queue, schedule queue, output queue).
use std::cmp::Ordering;

use bytemuck::{Pod, Zeroable};
use mesocarp::scheduling::Scheduleable;

/// Positive events carry real work; Negative events are anti-messages that
/// cancel a previously sent Positive event with the same identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Polarity {
    Positive = 0,
    Negative = 1,
}

impl PartialOrd for Polarity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Polarity {
    fn cmp(&self, other: &Self) -> Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// An opaque payload carried by an `Event`. The kernel never inspects it;
/// models that need richer data define their own variant and box it here.
pub type Payload = u64;

/// An event scheduled for delivery to `receiver_lp` at `receive_time`.
///
/// Immutable once constructed. Two events are **equal for annihilation**
/// (see [`Event::is_anti_pair_of`]) iff their `(receive_time, send_time,
/// sender_lp, generation)` tuple matches and their polarities are opposite.
///
/// The five-level comparator implemented by `Ord` --
/// `(receive_time, send_time, sender_lp, generation, polarity)` -- is the
/// unique total order used in the input queue, the schedule queue, and the
/// output queue; Positive sorts before Negative at equal identity so an
/// anti-pair is always adjacent in any queue built on this order.
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct Event {
    pub receiver_lp: usize,
    pub sender_lp: usize,
    pub receive_time: u64,
    pub send_time: u64,
    pub generation: u64,
    pub polarity: Polarity,
    pub payload: Payload,
}

impl Event {
    pub fn new(
        receiver_lp: usize,
        sender_lp: usize,
        receive_time: u64,
        send_time: u64,
        generation: u64,
        polarity: Polarity,
        payload: Payload,
    ) -> Self {
        Self {
            receiver_lp,
            sender_lp,
            receive_time,
            send_time,
            generation,
            polarity,
            payload,
        }
    }

    /// The four-field identity tuple used for annihilation and rollback
    /// bookkeeping, independent of polarity.
    pub fn identity(&self) -> (u64, u64, usize, u64) {
        (self.receive_time, self.send_time, self.sender_lp, self.generation)
    }

    pub fn is_negative(&self) -> bool {
        matches!(self.polarity, Polarity::Negative)
    }

    pub fn is_positive(&self) -> bool {
        matches!(self.polarity, Polarity::Positive)
    }

    /// Produce the anti-message of this (necessarily Positive) event: same
    /// identity tuple, opposite polarity. Guaranteed adjacent to `self` in
    /// any queue ordered by `Event`'s `Ord` impl.
    pub fn anti_message(&self) -> Event {
        debug_assert!(self.is_positive(), "anti_message() called on a non-positive event");
        Event {
            polarity: Polarity::Negative,
            ..*self
        }
    }

    /// Two events are a matched anti-pair iff their identity tuples match
    /// and exactly one of them is Negative.
    pub fn is_anti_pair_of(&self, other: &Event) -> bool {
        self.identity() == other.identity() && self.polarity != other.polarity
    }
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity() && self.polarity == other.polarity
    }
}
impl Eq for Event {}

impl std::hash::Hash for Event {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
        self.polarity.hash(state);
    }
}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        self.receive_time
            .cmp(&other.receive_time)
            .then_with(|| self.send_time.cmp(&other.send_time))
            .then_with(|| self.sender_lp.cmp(&other.sender_lp))
            .then_with(|| self.generation.cmp(&other.generation))
            .then_with(|| self.polarity.cmp(&other.polarity))
    }
}

impl Scheduleable for Event {
    fn time(&self) -> u64 {
        self.receive_time
    }
    fn commit_time(&self) -> u64 {
        self.send_time
    }
}

unsafe impl Pod for Event {}
unsafe impl Zeroable for Event {}

unsafe impl Send for Event {}
unsafe impl Sync for Event {}
