//! Wire message shapes and the outbound/inbound bridge to the transport
//! (§4.J, §6). The transport itself -- serialization, sockets, MPI ranks --
//! is an external collaborator; this module only defines what crosses the
//! boundary and the FIFO discipline for outbound sends, grounded on
//! `warped2`'s `TicketLock` (see `examples/original_source`).
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::event::Event;
use crate::gvt::Color;
use crate::termination::TermState;

#[derive(Debug, Clone, Copy)]
pub struct EventMessage {
    pub sender_node: usize,
    pub receiver_node: usize,
    pub event: Event,
    pub colour: Color,
}

#[derive(Debug, Clone, Copy)]
pub struct MatternToken {
    pub sender_node: usize,
    pub receiver_node: usize,
    pub m_clock: u64,
    pub m_send: u64,
    pub count: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct GvtUpdate {
    pub sender_node: usize,
    pub receiver_node: usize,
    pub new_gvt: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct TerminationToken {
    pub sender_node: usize,
    pub receiver_node: usize,
    pub state: TermState,
    pub initiator_node: usize,
    pub count: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct Terminator {
    pub sender_node: usize,
    pub receiver_node: usize,
}

/// The union of every message shape that crosses the transport boundary.
#[derive(Debug, Clone, Copy)]
pub enum WireMessage {
    Event(EventMessage),
    Mattern(MatternToken),
    Gvt(GvtUpdate),
    Termination(TerminationToken),
    Terminate(Terminator),
}

/// What the manager loop learned from dispatching one inbound message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchFlags {
    pub event_delivered: bool,
    pub token_received: bool,
    pub gvt_updated: bool,
    pub termination_token_received: bool,
    pub terminate: bool,
}

/// A simple FIFO ticket lock: fair under contention, unlike a bare mutex
/// which can starve a waiter indefinitely.
struct TicketLock {
    next_ticket: AtomicUsize,
    now_serving: AtomicUsize,
}

impl TicketLock {
    fn new() -> Self {
        Self {
            next_ticket: AtomicUsize::new(0),
            now_serving: AtomicUsize::new(0),
        }
    }

    fn lock(&self) -> TicketGuard<'_> {
        let my_ticket = self.next_ticket.fetch_add(1, Ordering::AcqRel);
        while self.now_serving.load(Ordering::Acquire) != my_ticket {
            std::hint::spin_loop();
        }
        TicketGuard { lock: self }
    }
}

struct TicketGuard<'a> {
    lock: &'a TicketLock,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        self.lock.now_serving.fetch_add(1, Ordering::Release);
    }
}

/// The outbound/inbound bridge: a ticket-locked FIFO send queue plus a
/// dispatch table the manager consults for each inbound message.
pub struct CommsBridge {
    outbound_lock: TicketLock,
    outbound: Mutex<VecDeque<WireMessage>>,
}

impl CommsBridge {
    pub fn new() -> Self {
        Self {
            outbound_lock: TicketLock::new(),
            outbound: Mutex::new(VecDeque::new()),
        }
    }

    /// Enqueue a message for the transport to carry, in FIFO order.
    pub fn insert(&self, msg: WireMessage) {
        let _ticket = self.outbound_lock.lock();
        self.outbound.lock().expect("outbound queue poisoned").push_back(msg);
    }

    /// Drain every queued outbound message for the transport to send.
    pub fn flush(&self) -> Vec<WireMessage> {
        let _ticket = self.outbound_lock.lock();
        self.outbound
            .lock()
            .expect("outbound queue poisoned")
            .drain(..)
            .collect()
    }

    /// Classify an inbound message for the manager loop. Routing to the
    /// actual handlers (GVT, termination, event delivery) happens in
    /// [`crate::kernel::Kernel`]; this just reports what kind of message it
    /// was so the manager knows which subsystem to drive next.
    pub fn classify(msg: &WireMessage) -> DispatchFlags {
        let mut flags = DispatchFlags::default();
        match msg {
            WireMessage::Event(_) => flags.event_delivered = true,
            WireMessage::Mattern(_) => flags.token_received = true,
            WireMessage::Gvt(_) => flags.gvt_updated = true,
            WireMessage::Termination(_) => flags.termination_token_received = true,
            WireMessage::Terminate(_) => flags.terminate = true,
        }
        flags
    }
}

impl Default for CommsBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Polarity;

    fn sample_event() -> EventMessage {
        EventMessage {
            sender_node: 0,
            receiver_node: 1,
            event: Event::new(2, 1, 10, 5, 0, Polarity::Positive, 0),
            colour: Color::White,
        }
    }

    #[test]
    fn flush_drains_in_fifo_order() {
        let bridge = CommsBridge::new();
        bridge.insert(WireMessage::Event(sample_event()));
        bridge.insert(WireMessage::Gvt(GvtUpdate {
            sender_node: 0,
            receiver_node: 1,
            new_gvt: 42,
        }));
        let drained = bridge.flush();
        assert_eq!(drained.len(), 2);
        assert!(matches!(drained[0], WireMessage::Event(_)));
        assert!(matches!(drained[1], WireMessage::Gvt(_)));
        assert!(bridge.flush().is_empty());
    }

    #[test]
    fn classify_reports_the_right_flag() {
        let flags = CommsBridge::classify(&WireMessage::Gvt(GvtUpdate {
            sender_node: 0,
            receiver_node: 1,
            new_gvt: 1,
        }));
        assert!(flags.gvt_updated);
        assert!(!flags.event_delivered);
    }
}
