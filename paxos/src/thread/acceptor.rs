//! # Summary
//!
//! This module defines the `Acceptor` task, which acts as Paxos's
//! distributed memory. Acceptors keep track of what commands have been
//! proposed for each slot, and never retract a promise or an accepted
//! triple (spec §4.1).

use std::collections::HashMap as Map;

use crate::internal;
use crate::message;
use crate::shared;
use crate::state;
use crate::thread::peer;

/// Acceptors can only receive P1A from scouts and P2A from commanders. A
/// P2A carries its originating commander's id alongside the payload so the
/// acceptor can echo it back on the P2B reply (see `respond_p2a`).
#[derive(Debug)]
pub enum In<C: state::Command> {
    P1a(message::P1A),
    P2a(message::CommanderId, message::P2A<C>),
}

/// Functions as distributed memory: `ballot` is the highest ballot ever
/// promised, `accepted` the most recently accepted triple per slot.
pub struct Acceptor<S: state::State> {
    id: usize,
    rx: internal::Rx<In<S::Command>>,
    shared_tx: shared::Shared<S>,
    ballot: message::Ballot,
    accepted: Map<usize, message::PValue<S::Command>>,
}

impl<S: state::State> Acceptor<S> {
    /// Initializes a new acceptor with the given transmission channels.
    pub fn new(id: usize, rx: internal::Rx<In<S::Command>>, shared_tx: shared::Shared<S>) -> Self {
        Acceptor {
            id,
            rx,
            shared_tx,
            ballot: message::Ballot::default(),
            accepted: Map::default(),
        }
    }

    /// Runs the acceptor loop until every sender has dropped.
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            trace!("received {:?}", message);
            match message {
                In::P1a(m) => self.respond_p1a(m),
                In::P2a(c_id, m) => self.respond_p2a(c_id, m),
            }
        }
    }

    /// Updates the highest seen ballot, and responds to the requesting
    /// scout with a P1B carrying every accepted triple.
    fn respond_p1a(&mut self, p1a: message::P1A) {
        self.ballot = std::cmp::max(p1a.ballot, self.ballot);
        let accepted = self.accepted.values().cloned().collect();
        let p1b = peer::In::P1b(message::P1B {
            acceptor_id: self.id,
            ballot: self.ballot,
            accepted,
        });
        trace!("sending {:?} to {}", p1b, p1a.from_leader_id);
        self.shared_tx.read().send(p1a.from_leader_id, p1b);
    }

    /// Updates the map of accepted triples, and responds to the requesting
    /// commander with a P2B. Echoes `c_id` back unchanged — it identifies
    /// the commander this reply must route to, and must not be reconstructed
    /// from `self.ballot`, which may have since moved past `c_id.ballot` on
    /// preemption (see `message::CommanderId`, `shared::State::forward`).
    fn respond_p2a(&mut self, c_id: message::CommanderId, p2a: message::P2A<S::Command>) {
        let pvalue = p2a.pvalue;
        if pvalue.ballot >= self.ballot {
            self.ballot = pvalue.ballot;
            self.accepted.insert(pvalue.slot, pvalue.clone());
        }
        let p2b = peer::In::P2b(
            c_id,
            message::P2B {
                acceptor_id: self.id,
                ballot: self.ballot,
                slot: pvalue.slot,
            },
        );
        trace!("sending {:?} to {}", p2b, p2a.from_leader_id);
        self.shared_tx.read().send(p2a.from_leader_id, p2b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::tests::TestCommand;

    fn acceptor(id: usize) -> (Acceptor<crate::thread::tests::TestState>, internal::Tx<In<TestCommand>>) {
        let (rx, tx) = internal::new();
        let (_, scout_tx) = internal::new();
        let (_, replica_tx) = internal::new();
        let (_, acceptor_tx) = internal::new();
        let shared_tx = shared::Shared::new(id, scout_tx, replica_tx, acceptor_tx);
        (Acceptor::new(id, rx, shared_tx), tx)
    }

    #[test]
    fn higher_ballot_replaces_promise() {
        let (mut acceptor, _tx) = acceptor(0);
        let low = message::Ballot { seq_num: 0, id: 1 };
        let high = message::Ballot { seq_num: 5, id: 2 };
        acceptor.respond_p1a(message::P1A { from_leader_id: 1, ballot: low });
        assert_eq!(acceptor.ballot, low);
        acceptor.respond_p1a(message::P1A { from_leader_id: 2, ballot: high });
        assert_eq!(acceptor.ballot, high);
        acceptor.respond_p1a(message::P1A { from_leader_id: 1, ballot: low });
        assert_eq!(acceptor.ballot, high, "promise must never regress");
    }

    #[test]
    fn p2a_below_promised_ballot_is_ignored() {
        let (mut acceptor, _tx) = acceptor(0);
        let high = message::Ballot { seq_num: 5, id: 0 };
        acceptor.ballot = high;
        let low = message::Ballot { seq_num: 1, id: 1 };
        let command = TestCommand { client_id: 0, chat_id: 0, payload: "x".into() };
        let c_id = message::CommanderId { ballot: low, slot: 0 };
        acceptor.respond_p2a(
            c_id,
            message::P2A { from_leader_id: 1, pvalue: message::PValue { slot: 0, ballot: low, command: command.into() } },
        );
        assert!(acceptor.accepted.is_empty());
        assert_eq!(acceptor.ballot, high);
    }

    #[test]
    fn p2a_at_or_above_promised_ballot_is_accepted() {
        let (mut acceptor, _tx) = acceptor(0);
        let ballot = message::Ballot { seq_num: 3, id: 1 };
        let command = TestCommand { client_id: 0, chat_id: 0, payload: "hi".into() };
        let c_id = message::CommanderId { ballot, slot: 2 };
        acceptor.respond_p2a(
            c_id,
            message::P2A { from_leader_id: 1, pvalue: message::PValue { slot: 2, ballot, command: command.clone().into() } },
        );
        assert_eq!(acceptor.ballot, ballot);
        assert_eq!(acceptor.accepted[&2].command, command.into());
    }
}
