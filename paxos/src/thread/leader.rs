//! # Summary
//!
//! This module defines the `Leader` task, which drives ballot progression
//! for a server (spec §4.4). It is passive under contention: it never
//! retries in a loop, it simply re-scouts at a strictly higher ballot once
//! it observes a rival, which bounds message amplification.

use std::collections::HashMap as Map;
use std::time;

use crate::internal;
use crate::message;
use crate::shared;
use crate::state;
use crate::thread::{commander, scout};

/// Leaders receive proposals from their replica, and adopts/preempts from
/// their own scouts and commanders. `TimeBomb` and `Decided` are harness
/// test-fixture plumbing for `TIMEBOMBLEADER` (spec §6): a commander
/// reports `Decided` each time it broadcasts a decision, and the leader
/// self-terminates once the configured count is reached.
#[derive(Debug)]
pub enum In<C: state::Command> {
    Propose(message::Proposal<C>),
    Adopted { ballot: message::Ballot, accepted: Vec<message::PValue<C>> },
    Preempted(message::Ballot),
    Decided,
    TimeBomb(u64),
}

/// Functions as the invariant-upholding command proposer for a server.
pub struct Leader<S: state::State> {
    id: usize,
    rx: internal::Rx<In<S::Command>>,
    tx: internal::Tx<In<S::Command>>,
    shared_tx: shared::Shared<S>,
    active: bool,
    backoff: f32,
    count: usize,
    timeout: time::Duration,
    ballot: message::Ballot,
    proposals: Map<usize, message::Command<S::Command>>,
    timebomb: Option<u64>,
}

impl<S: state::State> Leader<S> {
    pub fn new(
        id: usize,
        count: usize,
        rx: internal::Rx<In<S::Command>>,
        tx: internal::Tx<In<S::Command>>,
        shared_tx: shared::Shared<S>,
        timeout: time::Duration,
    ) -> Self {
        let mut leader = Leader {
            id,
            rx,
            tx,
            shared_tx,
            active: false,
            backoff: 100.0 * rand::random::<f32>(),
            count,
            timeout,
            ballot: message::Ballot { seq_num: 0, id },
            proposals: Map::default(),
            timebomb: None,
        };
        leader.spawn_scout();
        leader
    }

    /// Runs the leader loop for the lifetime of the server.
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            debug!("received {:?}", message);
            match message {
                In::Propose(proposal) => self.respond_propose(proposal),
                In::Preempted(ballot) => self.respond_preempted(ballot),
                In::Adopted { ballot, accepted } => self.respond_adopted(ballot, accepted),
                In::Decided => self.respond_decided(),
                In::TimeBomb(k) => self.timebomb = Some(k),
            }
        }
    }

    /// Records a new proposal; spawns a commander for it immediately if
    /// this leader is currently active.
    fn respond_propose(&mut self, proposal: message::Proposal<S::Command>) {
        if self.proposals.contains_key(&proposal.slot) {
            return;
        }
        debug!("{:?} proposed", proposal);
        self.proposals.insert(proposal.slot, proposal.command.clone());
        if self.active {
            self.spawn_commander(proposal);
        }
    }

    /// Adopts a ballot once a scout reaches majority: merges accepted
    /// triples into the working proposal map via `pairxor`/`pmax`, then
    /// spawns a commander for every resulting proposal.
    fn respond_adopted(&mut self, ballot: message::Ballot, accepted: Vec<message::PValue<S::Command>>) {
        if ballot != self.ballot {
            return; // stale adopt from a scout we've since abandoned
        }
        self.proposals = pairxor(self.proposals.clone(), pmax(accepted));
        info!("adopted with ballot {:?}", self.ballot);
        self.active = true;
        for (slot, command) in self.proposals.clone() {
            self.spawn_commander(message::Proposal { slot, command });
        }
    }

    /// Advances past a rival ballot and re-scouts.
    fn respond_preempted(&mut self, ballot: message::Ballot) {
        if ballot <= self.ballot {
            return;
        }
        debug!("preempted by {:?}", ballot);
        self.active = false;
        self.ballot = message::Ballot::bump_past(ballot, self.id);
        self.backoff *= 1.0 + rand::random::<f32>() / 2.0;
        self.spawn_scout();
    }

    fn respond_decided(&mut self) {
        if let Some(remaining) = self.timebomb.as_mut() {
            if *remaining == 0 {
                return;
            }
            *remaining -= 1;
            if *remaining == 0 {
                warn!("time bomb exhausted, terminating leader {}", self.id);
                std::process::exit(0);
            }
        }
    }

    fn spawn_commander(&self, proposal: message::Proposal<S::Command>) {
        let pvalue = message::PValue { slot: proposal.slot, ballot: self.ballot, command: proposal.command };
        let commander = commander::Commander::new(self.tx.clone(), self.shared_tx.clone(), pvalue, self.count, self.timeout);
        tokio::spawn(commander.run());
    }

    fn spawn_scout(&self) {
        let scout = scout::Scout::new(
            self.tx.clone(),
            self.shared_tx.clone(),
            self.ballot,
            self.count,
            time::Duration::from_millis(self.backoff.round() as u64),
            self.timeout,
        );
        tokio::spawn(scout.run());
    }
}

/// Picks, for each slot appearing in `pvalues`, the proposal whose triple
/// carries the maximum ballot (spec §4.2/§9, classic Paxos `pmax`).
fn pmax<C: state::Command>(pvalues: Vec<message::PValue<C>>) -> Map<usize, message::Command<C>> {
    let mut pmax: Map<usize, (message::Ballot, message::Command<C>)> = Map::default();
    for pvalue in pvalues {
        match pmax.get_mut(&pvalue.slot) {
            Some((ballot, command)) if pvalue.ballot > *ballot => {
                *ballot = pvalue.ballot;
                *command = pvalue.command;
            }
            Some(_) => {}
            None => {
                pmax.insert(pvalue.slot, (pvalue.ballot, pvalue.command));
            }
        }
    }
    pmax.into_iter().map(|(slot, (_, command))| (slot, command)).collect()
}

/// Overwrites `proposals` with every entry of `updates`; slots present only
/// in `proposals` are preserved (spec §4.2, Paxos-Made-Moderately-Complex
/// update rule).
fn pairxor<C: state::Command>(
    mut proposals: Map<usize, message::Command<C>>,
    updates: Map<usize, message::Command<C>>,
) -> Map<usize, message::Command<C>> {
    for (slot, command) in updates {
        proposals.insert(slot, command);
    }
    proposals
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::tests::TestCommand;

    fn command(n: usize) -> message::Command<TestCommand> {
        TestCommand { client_id: n, chat_id: n, payload: format!("m{}", n) }.into()
    }

    fn ballot(seq_num: u64, id: usize) -> message::Ballot {
        message::Ballot { seq_num, id }
    }

    #[test]
    fn pairxor_overwrites_only_updated_slots() {
        let mut proposals = Map::default();
        proposals.insert(0, command(0));
        proposals.insert(1, command(1));
        let mut updates = Map::default();
        updates.insert(1, command(11));
        updates.insert(2, command(2));
        let merged = pairxor(proposals, updates);
        assert_eq!(merged[&0], command(0));
        assert_eq!(merged[&1], command(11));
        assert_eq!(merged[&2], command(2));
    }

    #[test]
    fn pmax_picks_highest_ballot_per_slot() {
        let pvalues = vec![
            message::PValue { slot: 0, ballot: ballot(1, 0), command: command(1) },
            message::PValue { slot: 0, ballot: ballot(3, 0), command: command(3) },
            message::PValue { slot: 0, ballot: ballot(2, 0), command: command(2) },
        ];
        let result = pmax(pvalues);
        assert_eq!(result[&0], command(3));
    }

    proptest::proptest! {
        #[test]
        fn pmax_result_ballot_is_maximal(seeds in proptest::collection::vec((0u64..10, 0usize..4), 1..8)) {
            let pvalues: Vec<_> = seeds.iter().enumerate().map(|(i, (seq, owner))| {
                message::PValue {
                    slot: 0,
                    ballot: ballot(*seq, *owner),
                    command: command(i),
                }
            }).collect();
            let max_ballot = pvalues.iter().map(|p| p.ballot).max().unwrap();
            let winner = pvalues.iter().find(|p| p.ballot == max_ballot).unwrap().command.clone();
            let result = pmax(pvalues);
            proptest::prop_assert_eq!(result[&0].clone(), winner);
        }

        #[test]
        fn pairxor_never_drops_untouched_slots(
            base in proptest::collection::hash_set(0usize..20, 0..10),
            updated in proptest::collection::hash_set(0usize..20, 0..10),
        ) {
            let proposals: Map<_, _> = base.iter().map(|&s| (s, command(s))).collect();
            let updates: Map<_, _> = updated.iter().map(|&s| (s, command(s + 100))).collect();
            let untouched: Vec<_> = base.difference(&updated).cloned().collect();
            let merged = pairxor(proposals, updates.clone());
            for slot in untouched {
                proptest::prop_assert_eq!(merged.get(&slot).cloned(), Some(command(slot)));
            }
            for (slot, value) in &updates {
                proptest::prop_assert_eq!(merged.get(slot), Some(value));
            }
        }
    }

    #[tokio::test]
    async fn adopted_activates_leader_and_spawns_commanders() {
        let (rx, tx) = internal::new();
        let (_, scout_tx) = internal::new();
        let (_, replica_tx) = internal::new();
        let (_, acceptor_tx) = internal::new();
        let shared_tx = shared::Shared::new(0, scout_tx, replica_tx, acceptor_tx);
        let mut leader = Leader::new(0, 3, rx, tx, shared_tx, time::Duration::from_secs(10));
        assert!(!leader.active);
        leader.respond_adopted(leader.ballot, vec![]);
        assert!(leader.active);
    }

    #[tokio::test]
    async fn timebomb_exits_after_k_decisions() {
        // Exercises the counter decrement path without actually exiting the
        // test process: stop one short of zero.
        let (rx, tx) = internal::new();
        let (_, scout_tx) = internal::new();
        let (_, replica_tx) = internal::new();
        let (_, acceptor_tx) = internal::new();
        let shared_tx = shared::Shared::new(0, scout_tx, replica_tx, acceptor_tx);
        let mut leader = Leader::new(0, 3, rx, tx, shared_tx, time::Duration::from_secs(10));
        leader.timebomb = Some(2);
        leader.respond_decided();
        assert_eq!(leader.timebomb, Some(1));
    }
}
