//! # Summary
//!
//! This module implements the `Scout` task, a one-shot ballot-acquisition
//! actor (spec §4.2). It broadcasts Phase 1a for its ballot, collects
//! Phase 1b from a majority of acceptors, and reports either *adopted*
//! (with the union of accepted triples) or *preempted* (with the higher
//! ballot it observed) to its leader, then terminates.

use std::collections::HashSet as Set;
use std::time;

use tokio::time::{interval_at, Instant, Interval};

use crate::internal;
use crate::message;
use crate::shared;
use crate::state;
use crate::thread::{leader, peer};

/// Scouts can only receive P1B from acceptors.
pub type In<C> = message::P1B<C>;

/// Competes with other scouts for adoption by a majority of acceptors.
pub struct Scout<S: state::State> {
    rx: internal::Rx<In<S::Command>>,
    leader_tx: internal::Tx<leader::In<S::Command>>,
    shared_tx: shared::Shared<S>,
    ballot: message::Ballot,
    minority: usize,
    pvalues: Set<message::PValue<S::Command>>,
    timeout: Interval,
    waiting: Set<usize>,
}

impl<S: state::State> Scout<S> {
    pub fn new(
        leader_tx: internal::Tx<leader::In<S::Command>>,
        shared_tx: shared::Shared<S>,
        ballot: message::Ballot,
        count: usize,
        delay: time::Duration,
        timeout: time::Duration,
    ) -> Self {
        let waiting = (0..count).collect();
        let minority = (count - 1) / 2;
        let timeout = interval_at(Instant::now() + delay, timeout);
        let (rx, tx) = internal::new();
        shared_tx.write().replace_scout(tx);
        debug!("starting for {:?} with delay {:?}", ballot, delay);
        Scout {
            rx,
            leader_tx,
            shared_tx,
            ballot,
            minority,
            pvalues: Set::default(),
            timeout,
            waiting,
        }
    }

    /// Runs the scout until it is adopted, preempted, or every sender has
    /// dropped (e.g. its leader shut down).
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.timeout.tick() => self.send_p1a(),
                message = self.rx.recv() => {
                    match message {
                        Some(p1b) => if self.respond_p1b(p1b) { return },
                        None => return,
                    }
                }
            }
        }
    }

    /// Narrowcasts P1A to every acceptor who hasn't yet replied.
    fn send_p1a(&self) {
        let p1a = peer::In::P1a(message::P1A { from_leader_id: self.ballot.id, ballot: self.ballot });
        self.shared_tx.read().narrowcast(&self.waiting, p1a);
    }

    /// Processes one P1B reply. Returns `true` once the scout has reached a
    /// terminal state (adopted or preempted) and should stop running.
    fn respond_p1b(&mut self, p1b: message::P1B<S::Command>) -> bool {
        if p1b.ballot == self.ballot {
            self.pvalues.extend(p1b.accepted);
            self.waiting.remove(&p1b.acceptor_id);
            if self.waiting.len() <= self.minority {
                self.send_adopted();
                return true;
            }
            false
        } else if p1b.ballot > self.ballot {
            self.send_preempted(p1b.ballot);
            true
        } else {
            false
        }
    }

    fn send_adopted(&mut self) {
        debug!("{:?} adopted", self.ballot);
        let accepted = std::mem::take(&mut self.pvalues).into_iter().collect();
        self.leader_tx.send(leader::In::Adopted { ballot: self.ballot, accepted });
    }

    fn send_preempted(&self, ballot: message::Ballot) {
        debug!("{:?} preempted by {:?}", self.ballot, ballot);
        self.leader_tx.send(leader::In::Preempted(ballot));
    }
}

impl<S: state::State> Drop for Scout<S> {
    fn drop(&mut self) {
        debug!("dropping scout for {:?}", self.ballot);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::tests::TestCommand;

    fn scout(count: usize) -> (Scout<crate::thread::tests::TestState>, internal::Rx<leader::In<TestCommand>>) {
        let (leader_rx, leader_tx) = internal::new();
        let (_, scout_tx) = internal::new();
        let (_, replica_tx) = internal::new();
        let (_, acceptor_tx) = internal::new();
        let shared_tx = shared::Shared::new(0, scout_tx, replica_tx, acceptor_tx);
        let ballot = message::Ballot { seq_num: 0, id: 0 };
        let scout = Scout::new(
            leader_tx,
            shared_tx,
            ballot,
            count,
            time::Duration::from_secs(10),
            time::Duration::from_secs(10),
        );
        (scout, leader_rx)
    }

    #[test]
    fn reaches_majority_and_reports_adopted() {
        let (mut scout, mut leader_rx) = scout(3);
        let ballot = scout.ballot;
        assert!(!scout.respond_p1b(message::P1B { acceptor_id: 0, ballot, accepted: vec![] }));
        assert!(scout.respond_p1b(message::P1B { acceptor_id: 1, ballot, accepted: vec![] }));
        match leader_rx.try_recv() {
            Some(leader::In::Adopted { ballot: b, .. }) => assert_eq!(b, ballot),
            other => panic!("expected Adopted, got {:?}", other),
        }
    }

    #[test]
    fn higher_ballot_reports_preempted() {
        let (mut scout, mut leader_rx) = scout(3);
        let higher = message::Ballot { seq_num: scout.ballot.seq_num + 1, id: 7 };
        assert!(scout.respond_p1b(message::P1B { acceptor_id: 0, ballot: higher, accepted: vec![] }));
        match leader_rx.try_recv() {
            Some(leader::In::Preempted(b)) => assert_eq!(b, higher),
            other => panic!("expected Preempted, got {:?}", other),
        }
    }
}
