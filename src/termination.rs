//! The passive-state termination token ring, grounded on `warped2`'s
//! `TerminationManager` (see `examples/original_source`) and completing the
//! sticky-state propagation its original left unfinished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermState {
    Active,
    Passive,
}

/// What the node holding the token should do next.
pub enum TokenAction {
    /// Pass the (possibly upgraded) state on to the next node in the ring.
    Forward(TermState),
    /// The master observed a token that toured the whole ring and stayed
    /// Passive: broadcast a `Terminator` and stop.
    Terminate,
    /// The master observed an `Active` node somewhere in the ring; start a
    /// fresh round with a new Passive token.
    RestartRound,
}

/// One node's termination-detection state. A node's *sticky* state is
/// `Active` whenever it has had any work (a non-empty schedule queue or an
/// in-flight send) since it last forwarded the token; it resets to
/// `Passive` after each forward so a single burst of activity is reported
/// exactly once.
pub struct Terminator {
    node_id: usize,
    num_nodes: usize,
    sticky: TermState,
}

impl Terminator {
    pub fn new(node_id: usize, num_nodes: usize) -> Self {
        Self {
            node_id,
            num_nodes,
            sticky: TermState::Passive,
        }
    }

    pub fn is_master(&self) -> bool {
        self.node_id == 0
    }

    /// This node's current sticky state, observable for diagnostics/tests.
    pub fn sticky(&self) -> TermState {
        self.sticky
    }

    /// The manager loop calls this whenever it observes local activity
    /// (work dequeued, a send issued) between token visits.
    pub fn mark_active(&mut self) {
        self.sticky = TermState::Active;
    }

    /// The master only: is it time to kick off a detection round?
    pub fn master_should_initiate(&self) -> bool {
        self.is_master() && self.sticky == TermState::Passive
    }

    /// The master only: build the initial token for a new round.
    pub fn initiate(&mut self) -> TermState {
        debug_assert!(self.is_master());
        TermState::Passive
    }

    /// Process an inbound token carrying `incoming`, folding in this node's
    /// sticky state and resetting it for the next round.
    pub fn on_token(&mut self, incoming: TermState) -> TokenAction {
        let effective = if self.sticky == TermState::Active {
            TermState::Active
        } else {
            incoming
        };
        self.sticky = TermState::Passive;

        if self.is_master() {
            if effective == TermState::Passive {
                TokenAction::Terminate
            } else {
                TokenAction::RestartRound
            }
        } else {
            TokenAction::Forward(effective)
        }
    }

    /// The ring successor this node forwards the token to.
    pub fn next_node(&self) -> usize {
        (self.node_id + 1) % self.num_nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn idle_ring_terminates_after_one_lap() {
        let mut n0 = Terminator::new(0, 3);
        let mut n1 = Terminator::new(1, 3);
        let mut n2 = Terminator::new(2, 3);
        assert!(n0.master_should_initiate());
        let token = n0.initiate();
        let token = match n1.on_token(token) {
            TokenAction::Forward(t) => t,
            _ => panic!("non-master always forwards"),
        };
        let token = match n2.on_token(token) {
            TokenAction::Forward(t) => t,
            _ => panic!("non-master always forwards"),
        };
        match n0.on_token(token) {
            TokenAction::Terminate => {}
            _ => panic!("expected termination after a quiescent lap"),
        }
    }

    #[test]
    fn active_node_forces_another_round() {
        let mut n0 = Terminator::new(0, 2);
        let mut n1 = Terminator::new(1, 2);
        n1.mark_active();
        let token = n0.initiate();
        let token = match n1.on_token(token) {
            TokenAction::Forward(t) => t,
            _ => panic!("non-master always forwards"),
        };
        assert_eq!(token, TermState::Active);
        match n0.on_token(token) {
            TokenAction::RestartRound => {}
            _ => panic!("an active node must force another round"),
        }
        // n1's sticky state resets after reporting, so a quiet second lap
        // actually terminates.
        let token = n0.initiate();
        let token = match n1.on_token(token) {
            TokenAction::Forward(t) => t,
            _ => panic!("non-master always forwards"),
        };
        match n0.on_token(token) {
            TokenAction::Terminate => {}
            _ => panic!("expected termination on the quiet second lap"),
        }
    }
}
