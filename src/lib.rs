//! # Time Warp Kernel
//!
//! The event-scheduling and rollback core of a parallel discrete-event
//! simulation (PDES) kernel, built around the Time Warp optimistic
//! synchronization protocol: logical processes (LPs) advance independently
//! and are rolled back with anti-messages when a straggler event arrives in
//! their past.
//!
//! ## Architecture
//!
//! - [`event`] - the immutable `Event` value and its total order
//! - [`lp`] - the LP contract (`LogicalProcess`, `LPState`) and per-LP input queue
//! - [`schedule`] - the cross-LP ladder-queue schedule
//! - [`state`] - periodic state checkpointing and rollback restore
//! - [`output`] - the sent-event log and anti-message generation
//! - [`worker`] - the worker-thread loop tying queues and managers together
//! - [`gvt`] - local (per-node) and distributed (Mattern) Global Virtual Time
//! - [`termination`] - the passive-state termination token ring
//! - [`comms`] - wire message shapes and the outbound/inbound bridge
//! - [`partition`] - LP-to-node placement
//! - [`kernel`] - the top-level object wiring manager + workers together
use thiserror::Error;

pub mod comms;
pub mod config;
pub mod event;
pub mod gvt;
pub mod kernel;
pub mod lp;
pub mod output;
pub mod partition;
pub mod schedule;
pub mod state;
pub mod stats;
pub mod termination;
pub mod worker;

pub mod prelude {
    pub use crate::comms::{
        EventMessage, GvtUpdate, MatternToken, TerminationToken, Terminator, WireMessage,
    };
    pub use crate::config::{GvtMode, KernelConfig};
    pub use crate::event::{Event, Polarity};
    pub use crate::kernel::Kernel;
    pub use crate::lp::{LPState, LogicalProcess, RngState};
    pub use crate::KernelError;
}

/// Error enum covering every failure mode the kernel itself can observe.
///
/// Per the error-handling design, `ProtocolViolation`-class and
/// `ModelContract`-class variants are fatal: a worker that encounters one
/// aborts the process with diagnostics rather than trying to recover.
/// `TransportTransient` is confined to [`comms`]; `Overflow` is surfaced to
/// the manager loop, which applies backpressure by skipping a dispatch
/// cycle.
#[derive(Debug, Error)]
pub enum KernelError {
    /// A negative event arrived with no preceding positive counterpart in
    /// the receiver's input queue.
    #[error("protocol violation: anti-message for lp {lp} (receive_time={receive_time}) arrived before its positive counterpart")]
    ProtocolViolation { lp: usize, receive_time: u64 },

    /// The state queue became empty while restoring a checkpoint; every LP
    /// must always retain at least the time-0 checkpoint.
    #[error("protocol violation: state queue for lp {0} is empty on restore")]
    EmptyStateQueue(usize),

    /// The schedule queue produced an event for a receiver this node has no
    /// record of.
    #[error("protocol violation: scheduled event for unknown local lp {0}")]
    UnknownLp(usize),

    /// An LP's `receive_event` emitted an event timestamped before the
    /// event that triggered it.
    #[error("model contract violation: lp {lp} emitted an event at {emitted_time} while processing an event at {trigger_time}")]
    CausalityViolation {
        lp: usize,
        trigger_time: u64,
        emitted_time: u64,
    },

    /// Two LPs were registered under the same name.
    #[error("model contract violation: duplicate lp name {0:?}")]
    DuplicateLpName(String),

    /// A send failed at the communication bridge but the backing buffer is
    /// still valid and the send may be retried.
    #[error("transient transport error: {0}")]
    TransportTransient(String),

    /// The inbound message ring is saturated; the manager should skip a
    /// dispatch cycle rather than block.
    #[error("inbound message ring overflowed")]
    Overflow,

    /// A kernel-internal lock was poisoned by a panicking thread. Treated
    /// as fatal: the simulation's invariants can no longer be trusted.
    #[error("internal lock poisoned: {0}")]
    LockPoisoned(String),

    /// A configuration value was invalid or missing.
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Error surfaced from the `mesocarp` support crate.
    #[error("mesocarp error: {0}")]
    MesoError(#[from] mesocarp::MesoError),
}
