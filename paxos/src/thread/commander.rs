//! # Summary
//!
//! This module implements the `Commander` task, a one-shot per-decision
//! actor (spec §4.3). It broadcasts Phase 2a for a triple, collects
//! Phase 2b from a majority of acceptors, then broadcasts *decision* to
//! all replicas, or reports *preempted* to its leader.

use std::collections::HashSet as Set;

use tokio::time::{interval_at, Instant, Interval};

use crate::internal;
use crate::message;
use crate::shared;
use crate::state;
use crate::thread::{leader, peer};

/// Commanders can only receive P2B from acceptors.
pub type In = message::P2B;

/// Functions as the command proposer for one (ballot, slot, proposal) triple.
pub struct Commander<S: state::State> {
    id: message::CommanderId,
    rx: internal::Rx<In>,
    leader_tx: internal::Tx<leader::In<S::Command>>,
    shared_tx: shared::Shared<S>,
    minority: usize,
    pvalue: message::PValue<S::Command>,
    timeout: Interval,
    waiting: Set<usize>,
}

impl<S: state::State> Commander<S> {
    pub fn new(
        leader_tx: internal::Tx<leader::In<S::Command>>,
        shared_tx: shared::Shared<S>,
        pvalue: message::PValue<S::Command>,
        count: usize,
        timeout: std::time::Duration,
    ) -> Self {
        let waiting = (0..count).collect();
        let minority = (count - 1) / 2;
        let (rx, tx) = internal::new();
        let id = message::CommanderId { ballot: pvalue.ballot, slot: pvalue.slot };
        let interval = interval_at(Instant::now() + timeout, timeout);
        debug!("starting for {:?}", id);
        shared_tx.write().connect_commander(id, tx);
        let commander = Commander {
            id,
            rx,
            leader_tx,
            shared_tx,
            waiting,
            minority,
            pvalue,
            timeout: interval,
        };
        commander.send_p2a();
        commander
    }

    /// Runs the commander until it decides, is preempted, or every sender
    /// has dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.timeout.tick() => self.send_p2a(),
                message = self.rx.recv() => {
                    match message {
                        Some(p2b) => if self.respond_p2b(p2b) { return },
                        None => return,
                    }
                }
            }
        }
    }

    /// Narrowcasts P2A to every acceptor who hasn't yet replied, carrying
    /// this commander's id so the matching P2B can be routed back here even
    /// if the replying acceptor has since promised a higher ballot.
    fn send_p2a(&self) {
        let p2a = peer::In::P2a(
            self.id,
            message::P2A { from_leader_id: self.pvalue.ballot.id, pvalue: self.pvalue.clone() },
        );
        self.shared_tx.read().narrowcast(&self.waiting, p2a);
    }

    /// Processes one P2B reply. Returns `true` once the commander has
    /// reached a terminal state (decided or preempted).
    fn respond_p2b(&mut self, p2b: message::P2B) -> bool {
        if p2b.ballot == self.pvalue.ballot {
            self.waiting.remove(&p2b.acceptor_id);
            if self.waiting.len() <= self.minority {
                self.send_decision();
                return true;
            }
            false
        } else if p2b.ballot > self.pvalue.ballot {
            self.send_preempted(p2b.ballot);
            true
        } else {
            false
        }
    }

    fn send_decision(&self) {
        debug!("{:?} decided", self.pvalue);
        let decision = peer::In::Decision(message::Proposal {
            slot: self.pvalue.slot,
            command: self.pvalue.command.clone(),
        });
        self.shared_tx.read().broadcast(decision);
        self.leader_tx.send(leader::In::Decided);
    }

    fn send_preempted(&self, ballot: message::Ballot) {
        debug!("{:?} preempted", self.pvalue);
        self.leader_tx.send(leader::In::Preempted(ballot));
    }
}

impl<S: state::State> Drop for Commander<S> {
    fn drop(&mut self) {
        debug!("dropping commander for {:?}", self.pvalue);
        self.shared_tx.write().disconnect_commander(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::tests::TestCommand;

    fn commander(count: usize) -> (Commander<crate::thread::tests::TestState>, internal::Rx<leader::In<TestCommand>>) {
        let (leader_rx, leader_tx) = internal::new();
        let (_, scout_tx) = internal::new();
        let (_, replica_tx) = internal::new();
        let (_, acceptor_tx) = internal::new();
        let shared_tx = shared::Shared::new(0, scout_tx, replica_tx, acceptor_tx);
        let ballot = message::Ballot { seq_num: 0, id: 0 };
        let command = TestCommand { client_id: 0, chat_id: 0, payload: "hi".into() };
        let pvalue = message::PValue { slot: 3, ballot, command: command.into() };
        let commander = Commander::new(leader_tx, shared_tx, pvalue, count, std::time::Duration::from_secs(10));
        (commander, leader_rx)
    }

    #[test]
    fn reaches_majority_and_decides() {
        let (mut commander, _leader_rx) = commander(3);
        let ballot = commander.pvalue.ballot;
        assert!(!commander.respond_p2b(message::P2B { acceptor_id: 0, ballot, slot: 3 }));
        assert!(commander.respond_p2b(message::P2B { acceptor_id: 1, ballot, slot: 3 }));
    }

    #[test]
    fn higher_ballot_reports_preempted() {
        let (mut commander, mut leader_rx) = commander(3);
        let higher = message::Ballot { seq_num: commander.pvalue.ballot.seq_num + 1, id: 9 };
        assert!(commander.respond_p2b(message::P2B { acceptor_id: 0, ballot: higher, slot: 3 }));
        match leader_rx.try_recv() {
            Some(leader::In::Preempted(b)) => assert_eq!(b, higher),
            other => panic!("expected Preempted, got {:?}", other),
        }
    }
}
