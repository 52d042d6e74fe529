//! The top-level object: owns every per-node manager and spawns the worker
//! thread pool. An explicit-context design (§9 Design Notes) in place of a
//! global `static` dispatcher -- every manager a worker or the GVT loop
//! touches is reached through a `Node` reference, never thread-local or
//! process-global state, so multiple kernels can coexist in one process
//! (handy for the end-to-end tests, which run several small simulations
//! side by side).
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tracing::{debug, info};

use crate::comms::{CommsBridge, WireMessage};
use crate::config::{GvtMode, KernelConfig};
use crate::gvt::{LocalGvt, MatternNode};
use crate::lp::input_queue::InputQueue;
use crate::lp::{LPState, LogicalProcess, LpRuntime};
use crate::output::OutputManager;
use crate::partition::Partitioner;
use crate::schedule::ScheduleQueue;
use crate::state::StateManager;
use crate::stats::{Statistics, StatsSnapshot};
use crate::termination::{TermState, Terminator, TokenAction};
use crate::worker::{self, StepOutcome};
use crate::KernelError;

/// Maps a poisoned-mutex panic to a [`KernelError::LockPoisoned`] instead of
/// propagating the panic, since a worker panicking mid-update leaves the
/// kernel's invariants unverifiable and the whole run must be treated as
/// failed rather than silently continuing on stale data.
pub(crate) trait LockExt<T> {
    fn lock_poisoned(&self) -> Result<MutexGuard<'_, T>, KernelError>;
}

impl<T> LockExt<T> for Mutex<T> {
    fn lock_poisoned(&self) -> Result<MutexGuard<'_, T>, KernelError> {
        self.lock().map_err(|_| KernelError::LockPoisoned("node mutex poisoned".to_string()))
    }
}

/// Kernel-side bookkeeping for one LP: its model plus its input queue, each
/// behind its own lock so a worker blocked restoring one LP's state never
/// blocks another LP's forward progress.
pub struct LpCell {
    pub input: Mutex<InputQueue>,
    pub runtime: Mutex<LpRuntime>,
}

/// Everything a worker thread or the manager loop needs: the schedule queue,
/// every per-LP cell, the state/output managers, local and distributed GVT
/// state, the termination detector, and the comms bridge. Shared behind an
/// `Arc` across the worker pool.
pub struct Node {
    pub this_node: usize,
    pub num_nodes: usize,
    pub config: KernelConfig,
    lps: Vec<LpCell>,
    pub schedule: ScheduleQueue,
    pub state_mgr: Mutex<StateManager>,
    pub output_mgr: Mutex<OutputManager>,
    pub local_gvt: LocalGvt,
    pub mattern: Mutex<MatternNode>,
    pub terminator: Mutex<Terminator>,
    pub comms: CommsBridge,
    pub partitioner: Box<dyn Partitioner>,
    pub stats: Statistics,
    committed_gvt: AtomicU64,
}

impl Node {
    pub fn lp(&self, id: usize) -> Result<&LpCell, KernelError> {
        self.lps.get(id).ok_or(KernelError::UnknownLp(id))
    }

    pub fn num_lps(&self) -> usize {
        self.lps.len()
    }

    pub fn committed_gvt(&self) -> u64 {
        self.committed_gvt.load(Ordering::SeqCst)
    }

    fn set_committed_gvt(&self, value: u64) {
        self.committed_gvt.store(value, Ordering::SeqCst);
    }

    pub fn is_quiescent(&self) -> Result<bool, KernelError> {
        self.schedule.is_empty()
    }

    /// Drop every checkpoint, output entry, and input-queue entry this node
    /// no longer needs now that nothing can roll back before `gvt` (§5
    /// invariant 3).
    pub fn fossil_collect(&self, gvt: u64) -> Result<(), KernelError> {
        let mut state_mgr = self.state_mgr.lock_poisoned()?;
        let mut output_mgr = self.output_mgr.lock_poisoned()?;
        for (id, cell) in self.lps.iter().enumerate() {
            state_mgr.fossil_collect(id, gvt)?;
            output_mgr.fossil_collect(id, gvt)?;
            cell.input.lock_poisoned()?.fossil_below(gvt);
        }
        Ok(())
    }

    /// Apply an inbound message from the transport (§4.J). The transport
    /// itself -- sockets, MPI ranks, serialization -- is an external
    /// collaborator; this is the seam it calls into.
    pub fn handle_inbound(&self, msg: WireMessage) -> Result<(), KernelError> {
        match msg {
            WireMessage::Event(em) => {
                self.mattern.lock_poisoned()?.on_receive();
                worker::deliver_local(self, em.event)
            }
            WireMessage::Mattern(tok) => {
                let payload = crate::gvt::TokenPayload {
                    m_clock: tok.m_clock,
                    m_send: tok.m_send,
                    count: tok.count,
                };
                let outcome = self.mattern.lock_poisoned()?.on_token(payload, self.committed_gvt());
                match outcome {
                    crate::gvt::TokenOutcome::Forward(forwarded) => {
                        self.comms.insert(WireMessage::Mattern(crate::comms::MatternToken {
                            sender_node: self.this_node,
                            receiver_node: (self.this_node + 1) % self.num_nodes.max(1),
                            m_clock: forwarded.m_clock,
                            m_send: forwarded.m_send,
                            count: forwarded.count,
                        }));
                    }
                    crate::gvt::TokenOutcome::Complete(gvt) => {
                        self.set_committed_gvt(gvt);
                        self.fossil_collect(gvt)?;
                        self.mattern.lock_poisoned()?.on_gvt_update();
                        self.stats.record_gvt_cycle();
                        info!(gvt, "distributed gvt cycle complete");
                    }
                }
                Ok(())
            }
            WireMessage::Gvt(update) => {
                self.mattern.lock_poisoned()?.on_gvt_update();
                self.set_committed_gvt(update.new_gvt);
                self.fossil_collect(update.new_gvt)
            }
            WireMessage::Termination(tt) => {
                let mut term = self.terminator.lock_poisoned()?;
                match term.on_token(tt.state) {
                    TokenAction::Forward(state) => {
                        self.comms.insert(WireMessage::Termination(crate::comms::TerminationToken {
                            sender_node: self.this_node,
                            receiver_node: term.next_node(),
                            state,
                            initiator_node: tt.initiator_node,
                            count: tt.count,
                        }));
                    }
                    TokenAction::Terminate => {
                        self.comms.insert(WireMessage::Terminate(crate::comms::Terminator {
                            sender_node: self.this_node,
                            receiver_node: term.next_node(),
                        }));
                    }
                    TokenAction::RestartRound => {
                        self.comms.insert(WireMessage::Termination(crate::comms::TerminationToken {
                            sender_node: self.this_node,
                            receiver_node: term.next_node(),
                            state: TermState::Passive,
                            initiator_node: tt.initiator_node,
                            count: tt.count + 1,
                        }));
                    }
                }
                Ok(())
            }
            WireMessage::Terminate(_) => Ok(()),
        }
    }
}

/// The top-level kernel: a built [`Node`] plus the worker thread pool that
/// drives it. `build` registers every LP and seeds its initial events;
/// `run` spawns the workers and drives the local-GVT / fossil-collection
/// cycle on the calling thread until the node is quiescent at the
/// configured time horizon.
pub struct Kernel {
    node: Arc<Node>,
}

impl Kernel {
    /// Build a single-node kernel from `lps` (registered in order, so LP `i`
    /// is `lps[i]`). Calls `validate()` on `config` and each model's
    /// `initial_events`.
    pub fn build(
        config: KernelConfig,
        partitioner: Box<dyn Partitioner>,
        lps: Vec<(String, Box<dyn LogicalProcess>)>,
    ) -> Result<Self, KernelError> {
        config.validate()?;
        if lps.len() != config.num_lps {
            return Err(KernelError::ConfigError(format!(
                "config declares {} lps but {} were registered",
                config.num_lps,
                lps.len()
            )));
        }

        let mut seen_names = std::collections::HashSet::new();
        for (name, _) in &lps {
            if !seen_names.insert(name.clone()) {
                return Err(KernelError::DuplicateLpName(name.clone()));
            }
        }

        let num_lps = lps.len();
        let schedule = ScheduleQueue::new();
        let mut cells = Vec::with_capacity(num_lps);
        let mut initial_states: Vec<(Box<dyn LPState>, Vec<Vec<u8>>)> = Vec::with_capacity(num_lps);

        for (id, (name, model)) in lps.into_iter().enumerate() {
            let mut runtime = LpRuntime::new(id, name, model);
            let initial = runtime.model.initial_events(id);
            let (state_ref, rngs) = runtime.model.state_and_rngs();
            let snapshot = state_ref.clone_state();
            let rng_snapshots: Vec<Vec<u8>> = rngs.into_iter().map(|r| r.snapshot()).collect();
            initial_states.push((snapshot, rng_snapshots));

            let mut input = InputQueue::new(id);
            for event in initial {
                if let crate::lp::input_queue::InsertOutcome::BecameScheduled(ev) = input.insert(event)? {
                    schedule.insert(ev)?;
                }
            }

            cells.push(LpCell {
                input: Mutex::new(input),
                runtime: Mutex::new(runtime),
            });
        }

        let node = Node {
            this_node: 0,
            num_nodes: 1,
            state_mgr: Mutex::new(StateManager::new(config.checkpoint_period, config.state_arena_size, initial_states)),
            output_mgr: Mutex::new(OutputManager::new(num_lps, config.anti_msg_arena_size)),
            local_gvt: LocalGvt::new(config.num_workers.max(1), config.gvt_mode),
            mattern: Mutex::new(MatternNode::new(true)),
            terminator: Mutex::new(Terminator::new(0, 1)),
            comms: CommsBridge::new(),
            partitioner,
            stats: Statistics::new(config.num_workers.max(1)),
            committed_gvt: AtomicU64::new(0),
            config,
            lps: cells,
        };

        Ok(Self { node: Arc::new(node) })
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// Run to completion: spawn the worker pool, drive GVT collection and
    /// fossil collection on the calling thread, and return the aggregated
    /// statistics once every worker has exited.
    pub fn run(self) -> Result<StatsSnapshot, KernelError> {
        let mut handles = Vec::with_capacity(self.node.config.num_workers);
        for tid in 0..self.node.config.num_workers {
            let node = Arc::clone(&self.node);
            handles.push(std::thread::spawn(move || worker_thread_main(node, tid)));
        }

        manager_loop(&self.node)?;

        for handle in handles {
            handle.join().map_err(|_| KernelError::LockPoisoned("worker thread panicked".to_string()))??;
        }

        Ok(self.node.stats.snapshot())
    }
}

fn worker_thread_main(node: Arc<Node>, tid: usize) -> Result<(), KernelError> {
    loop {
        match worker::step(&node, tid, &node.stats.workers[tid])? {
            StepOutcome::Exit => return Ok(()),
            StepOutcome::Idle => std::thread::yield_now(),
            StepOutcome::Processed => {}
        }
    }
}

/// Drives local-GVT collection to completion, applies the result as this
/// node's committed GVT, runs fossil collection, and drives the
/// termination-detection ring to confirm global quiescence before
/// returning. There is currently only ever one node (see
/// [`Kernel::build`]), so the ring always forwards to itself through
/// [`Node::handle_inbound`] rather than a real transport; the wire shapes
/// and `Terminator`/`MatternNode` state machines are still exercised
/// exactly as a multi-node deployment would drive them once an embedder
/// wires an actual cross-node transport to `Node::handle_inbound`.
fn manager_loop(node: &Node) -> Result<(), KernelError> {
    let period = Duration::from_millis(node.config.gvt_period_ms.max(1));
    let mut terminated = false;
    loop {
        if node.committed_gvt() >= node.config.max_sim_time && terminated {
            return Ok(());
        }

        let local_min = match node.local_gvt.mode() {
            GvtMode::Async => {
                node.local_gvt.start_async_cycle();
                loop {
                    if let Some(min) = node.local_gvt.try_complete_async() {
                        break min;
                    }
                    std::thread::yield_now();
                }
            }
            GvtMode::Sync => node.local_gvt.collect_sync(),
        };

        // Every worker reporting `u64::MAX` (idle) only means "caught up to
        // the horizon" if the schedule queue is actually empty -- otherwise
        // it just means this cycle raced ahead of a worker still about to
        // dequeue real work, and GVT must not advance.
        let quiescent = node.is_quiescent()?;
        let gvt = if local_min == u64::MAX {
            if quiescent { node.config.max_sim_time } else { node.committed_gvt() }
        } else {
            local_min.min(node.config.max_sim_time)
        };
        node.set_committed_gvt(gvt);
        node.stats.record_gvt_cycle();
        node.fossil_collect(gvt)?;
        debug!(gvt, "advanced gvt");

        if quiescent {
            if !terminated {
                drive_termination_round(node, &mut terminated)?;
            }
        } else {
            node.terminator.lock_poisoned()?.mark_active();
        }

        std::thread::sleep(period);
    }
}

/// Runs one lap of the termination token ring from the master. For a
/// single node the ring always forwards back to itself, so the round
/// resolves synchronously; `master_should_initiate` is consulted for
/// logging only -- the round still runs even when this node's own sticky
/// state is `Active`, since folding that state in via `on_token` is what
/// resets it for the next lap (gating on it here would leave it stuck
/// `Active` forever once set).
fn drive_termination_round(node: &Node, terminated: &mut bool) -> Result<(), KernelError> {
    let (should_initiate, token, next) = {
        let mut term = node.terminator.lock_poisoned()?;
        let should_initiate = term.master_should_initiate();
        (should_initiate, term.initiate(), term.next_node())
    };
    debug!(should_initiate, "termination round initiated");

    node.handle_inbound(WireMessage::Termination(crate::comms::TerminationToken {
        sender_node: node.this_node,
        receiver_node: next,
        state: token,
        initiator_node: node.this_node,
        count: 0,
    }))?;

    loop {
        let drained = node.comms.flush();
        if drained.is_empty() {
            break;
        }
        for msg in drained {
            if let WireMessage::Terminate(_) = msg {
                *terminated = true;
                info!("termination confirmed");
            } else {
                node.handle_inbound(msg)?;
            }
        }
    }
    Ok(())
}
