//! Mattern's coloured-token distributed GVT algorithm, grounded on
//! `warped2`'s `TimeWarpMatternGVTManager` (see `examples/original_source`).
//!
//! This module holds only the per-node algorithm state and the pure
//! token-transformation logic; addressing and transport are the
//! communication bridge's job (see [`crate::comms`]).
const UNSET: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    White,
    Red,
}

/// The token payload carried between nodes. Wire addressing
/// (`sender_node`/`receiver_node`) lives on [`crate::comms::MatternToken`];
/// this is just the accumulator triple described in §4.H.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenPayload {
    pub m_clock: u64,
    pub m_send: u64,
    pub count: i64,
}

/// What a node should do after processing an inbound token.
pub enum TokenOutcome {
    /// Forward this payload to the next node in the ring.
    Forward(TokenPayload),
    /// The initiator observed a quiescent ring; this is the new GVT.
    Complete(u64),
}

/// One node's Mattern state. A node is White until it first sees a token,
/// then Red until the next GVT update resets it.
pub struct MatternNode {
    color: Color,
    white_send_count: i64,
    min_red_send_ts: u64,
    is_initiator: bool,
    rounds_sent: u32,
}

impl MatternNode {
    pub fn new(is_initiator: bool) -> Self {
        Self {
            color: Color::White,
            white_send_count: 0,
            min_red_send_ts: UNSET,
            is_initiator,
            rounds_sent: 0,
        }
    }

    pub fn color(&self) -> Color {
        self.color
    }

    /// Called whenever this node sends an event.
    pub fn on_send(&mut self, receive_time: u64) {
        match self.color {
            Color::White => self.white_send_count += 1,
            Color::Red => self.min_red_send_ts = self.min_red_send_ts.min(receive_time),
        }
    }

    /// Called whenever this node receives an event (only White nodes track
    /// receipts; a White node's outstanding-message count must reach zero
    /// for the token accounting to be exact).
    pub fn on_receive(&mut self) {
        if self.color == Color::White {
            self.white_send_count -= 1;
        }
    }

    /// Initiator only: begin a new round.
    pub fn initiate_round(&mut self, local_gvt: u64) -> TokenPayload {
        debug_assert!(self.is_initiator);
        self.color = Color::Red;
        self.min_red_send_ts = UNSET;
        let count = self.white_send_count;
        self.white_send_count = 0;
        self.rounds_sent += 1;
        TokenPayload {
            m_clock: local_gvt,
            m_send: UNSET,
            count,
        }
    }

    /// Any node receiving a token forwards it after folding in its own
    /// state, except the initiator, which instead checks for completion.
    pub fn on_token(&mut self, token: TokenPayload, local_gvt: u64) -> TokenOutcome {
        if self.is_initiator {
            let count = token.count + self.white_send_count;
            if count == 0 && self.rounds_sent >= 2 {
                return TokenOutcome::Complete(token.m_clock.min(token.m_send));
            }
            // The ring hasn't quiesced (or this is only the first pass);
            // fold in our own state like any other node, then start another
            // round rather than forwarding this one.
            self.fold_in(token, local_gvt);
            let restarted = self.initiate_round(self.m_clock_floor(token, local_gvt));
            return TokenOutcome::Forward(restarted);
        }

        let folded = self.fold_in(token, local_gvt);
        self.white_send_count = 0;
        TokenOutcome::Forward(folded)
    }

    fn m_clock_floor(&self, token: TokenPayload, local_gvt: u64) -> u64 {
        token.m_clock.min(local_gvt)
    }

    fn fold_in(&mut self, token: TokenPayload, local_gvt: u64) -> TokenPayload {
        if self.color == Color::White {
            self.color = Color::Red;
            self.min_red_send_ts = UNSET;
        }
        TokenPayload {
            m_clock: token.m_clock.min(local_gvt),
            m_send: token.m_send.min(self.min_red_send_ts),
            count: token.count + self.white_send_count,
        }
    }

    /// Called on every node when a `GVTUpdate` broadcast arrives: resets
    /// colour for the next round.
    pub fn on_gvt_update(&mut self) {
        self.color = Color::White;
        self.white_send_count = 0;
        self.min_red_send_ts = UNSET;
        self.rounds_sent = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn white_sends_increment_and_receives_decrement() {
        let mut node = MatternNode::new(false);
        node.on_send(10);
        node.on_send(20);
        node.on_receive();
        assert_eq!(node.white_send_count, 1);
    }

    #[test]
    fn red_sends_track_minimum_timestamp_not_count() {
        let mut node = MatternNode::new(false);
        node.color = Color::Red;
        node.on_send(30);
        node.on_send(10);
        assert_eq!(node.min_red_send_ts, 10);
        assert_eq!(node.white_send_count, 0);
    }

    #[test]
    fn non_initiator_turns_red_and_forwards() {
        let mut node = MatternNode::new(false);
        node.on_send(5); // white_send_count = 1
        let token = TokenPayload {
            m_clock: 100,
            m_send: UNSET,
            count: 3,
        };
        match node.on_token(token, 50) {
            TokenOutcome::Forward(forwarded) => {
                assert_eq!(forwarded.m_clock, 50); // min(100, local_gvt=50)
                assert_eq!(forwarded.count, 4); // 3 + our 1 outstanding white send
            }
            TokenOutcome::Complete(_) => panic!("non-initiator never completes"),
        }
        assert_eq!(node.color(), Color::Red);
        assert_eq!(node.white_send_count, 0);
    }

    #[test]
    fn initiator_completes_on_quiescent_second_round() {
        let mut node = MatternNode::new(true);
        let _first = node.initiate_round(10); // rounds_sent = 1
        let returned = TokenPayload {
            m_clock: 10,
            m_send: 15,
            count: 0,
        };
        // First time back: rounds_sent is only 1, so it must restart, not complete.
        match node.on_token(returned, 10) {
            TokenOutcome::Forward(_) => {}
            TokenOutcome::Complete(_) => panic!("must not complete before the second round"),
        }
        assert_eq!(node.rounds_sent, 2);

        let second_return = TokenPayload {
            m_clock: 10,
            m_send: 12,
            count: 0,
        };
        match node.on_token(second_return, 10) {
            TokenOutcome::Complete(gvt) => assert_eq!(gvt, 10),
            TokenOutcome::Forward(_) => panic!("expected completion on quiescent second round"),
        }
    }
}
