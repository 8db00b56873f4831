//! # Summary
//!
//! This module defines the `Replica` task (spec §4.5), which accepts chats
//! from clients, proposes them to the local leader, executes decisions on
//! the state machine in slot order, and answers the all-clear barrier
//! (spec §4.6) used by the test harness to confirm agreement across
//! replicas.

use std::collections::HashMap as Map;

use tokio::sync::oneshot;

use crate::barrier::Barrier;
use crate::internal;
use crate::message;
use crate::shared;
use crate::state;
use crate::thread::{client, leader, peer};

/// Replicas receive chats from their client connections, decisions from
/// commanders (forwarded by peers), and all-clear coordination traffic.
#[derive(Debug)]
pub enum In<C: state::Command> {
    Chat(C),
    Decision(message::Proposal<C>),
    AllClear,
    AllDecisions(Vec<(usize, message::Command<C>)>),
    /// Harness-control query: replies `true` iff the barrier is currently `Done`.
    CheckDone(oneshot::Sender<bool>),
}

/// Maintains the replicated state machine and communicates with clients.
pub struct Replica<S: state::State> {
    id: usize,
    primary_id: usize,
    rx: internal::Rx<In<S::Command>>,
    leader_tx: internal::Tx<leader::In<S::Command>>,
    shared_tx: shared::Shared<S>,
    state: S,

    proposal_slot: usize,
    slot_num: usize,
    proposals: Map<usize, message::Command<S::Command>>,
    decisions: Map<usize, message::Command<S::Command>>,
    buffered: Vec<message::Command<S::Command>>,
    barrier: Barrier<message::Command<S::Command>>,
}

impl<S: state::State> Replica<S> {
    pub fn new(
        id: usize,
        primary_id: usize,
        leader_tx: internal::Tx<leader::In<S::Command>>,
        shared_tx: shared::Shared<S>,
        rx: internal::Rx<In<S::Command>>,
    ) -> Self {
        Replica {
            id,
            primary_id,
            rx,
            leader_tx,
            shared_tx,
            state: S::default(),
            proposal_slot: 0,
            slot_num: 0,
            proposals: Map::default(),
            decisions: Map::default(),
            buffered: Vec::new(),
            barrier: Barrier::default(),
        }
    }

    /// Runs the replica loop for the lifetime of the server.
    pub async fn run(mut self) {
        while let Some(message) = self.rx.recv().await {
            debug!("received {:?}", message);
            match message {
                In::Chat(command) => self.respond_chat(command),
                In::Decision(proposal) => self.respond_decision(proposal),
                In::AllClear => self.respond_all_clear(),
                In::AllDecisions(reference) => self.respond_all_decisions(reference.into_iter().collect()),
                In::CheckDone(reply) => {
                    let done = self.barrier.is_done();
                    if done {
                        self.barrier.reset();
                    }
                    let _ = reply.send(done);
                }
            }
        }
    }

    /// Buffers the chat while an all-clear round is in progress; otherwise
    /// proposes it immediately.
    fn respond_chat(&mut self, command: S::Command) {
        let command = command.into();
        if self.barrier.is_set() {
            self.buffered.push(command);
        } else {
            self.propose(command);
        }
    }

    /// Records a decision, then delivers every contiguously-decided slot
    /// starting at `slot_num`, re-proposing any proposal it invalidates.
    fn respond_decision(&mut self, proposal: message::Proposal<S::Command>) {
        self.decisions.insert(proposal.slot, proposal.command);
        self.barrier.recheck(&self.decisions);
        while let Some(decided) = self.decisions.get(&self.slot_num).cloned() {
            if let Some(proposed) = self.proposals.get(&self.slot_num) {
                if *proposed != decided {
                    let proposed = proposed.clone();
                    self.propose(proposed);
                }
            }
            self.perform(decided);
        }
    }

    /// The primary's replica snapshots its decisions, starts its own
    /// barrier round, and broadcasts the snapshot to every replica
    /// (including itself, via `Shared::broadcast`'s local forward).
    fn respond_all_clear(&mut self) {
        let reference: Vec<_> = self.decisions.iter().map(|(&slot, command)| (slot, command.clone())).collect();
        self.shared_tx.read().broadcast(peer::In::AllDecisions(reference));
    }

    /// Starts (or continues) a barrier round against `reference`, comparing
    /// it to this replica's own decisions.
    fn respond_all_decisions(&mut self, reference: Map<usize, message::Command<S::Command>>) {
        self.barrier = Barrier::set(reference);
        self.barrier.recheck(&self.decisions);
    }

    /// Drops the proposal if an equal command already has a decision
    /// (spec §4.5); otherwise picks the lowest free slot and delegates to
    /// the leader.
    fn propose(&mut self, command: message::Command<S::Command>) {
        if self.decisions.values().any(|decided| *decided == command) {
            return;
        }
        while self.proposals.contains_key(&self.proposal_slot) || self.decisions.contains_key(&self.proposal_slot) {
            self.proposal_slot += 1;
        }
        info!("proposing {:?} for slot {}", command, self.proposal_slot);
        self.proposals.insert(self.proposal_slot, command.clone());
        self.leader_tx.send(leader::In::Propose(message::Proposal { slot: self.proposal_slot, command }));
    }

    /// Delivers `command` at `slot_num`, skipping delivery if an equal
    /// command was already delivered at an earlier slot under a different
    /// slot assignment, then drains any chats buffered during a barrier
    /// round once it has cleared.
    fn perform(&mut self, command: message::Command<S::Command>) {
        let already_performed = self
            .decisions
            .iter()
            .any(|(&slot, decided)| slot < self.slot_num && *decided == command);
        if already_performed {
            self.slot_num += 1;
            return;
        }
        info!("executing {:?} in slot {}", command, self.slot_num);
        let _ = self.state.execute(self.slot_num, command.clone().inner());
        if self.id == self.primary_id {
            self.shared_tx.read().broadcast_client(client::Out { slot: self.slot_num, command });
        }
        self.slot_num += 1;
        self.drain_buffered();
    }

    /// Proposes every chat buffered while the barrier was `Set`, once it
    /// has since cleared back to `Idle`.
    fn drain_buffered(&mut self) {
        if !self.barrier.is_set() && !self.buffered.is_empty() {
            for command in std::mem::take(&mut self.buffered) {
                self.propose(command);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::tests::{TestCommand, TestState};

    fn replica() -> (Replica<TestState>, internal::Rx<leader::In<TestCommand>>) {
        let (leader_rx, leader_tx) = internal::new();
        let (_, scout_tx) = internal::new();
        let (_, replica_tx) = internal::new();
        let (_, acceptor_tx) = internal::new();
        let shared_tx = shared::Shared::new(0, scout_tx, replica_tx, acceptor_tx);
        let (rx, _tx) = internal::new();
        (Replica::new(0, 0, leader_tx, shared_tx, rx), leader_rx)
    }

    fn command(n: usize) -> TestCommand {
        TestCommand { client_id: n, chat_id: n, payload: format!("m{}", n) }
    }

    #[test]
    fn propose_picks_lowest_free_slot() {
        let (mut replica, mut leader_rx) = replica();
        replica.respond_chat(command(0));
        match leader_rx.try_recv() {
            Some(leader::In::Propose(p)) => assert_eq!(p.slot, 0),
            other => panic!("expected Propose, got {:?}", other),
        }
    }

    #[test]
    fn propose_skips_already_decided_value() {
        let (mut replica, _leader_rx) = replica();
        replica.decisions.insert(0, command(5).into());
        replica.propose(command(5).into());
        assert!(replica.proposals.is_empty());
    }

    #[test]
    fn decision_delivers_contiguous_slots_in_order() {
        let (mut replica, _leader_rx) = replica();
        replica.respond_decision(message::Proposal { slot: 1, command: command(1).into() });
        assert_eq!(replica.slot_num, 0); // slot 0 still missing
        replica.respond_decision(message::Proposal { slot: 0, command: command(0).into() });
        assert_eq!(replica.slot_num, 2);
        assert_eq!(replica.state.performed, vec![(0, command(0)), (1, command(1))]);
    }

    #[test]
    fn chat_is_buffered_while_barrier_set() {
        let (mut replica, _leader_rx) = replica();
        replica.barrier = Barrier::set(Map::default());
        replica.respond_chat(command(0));
        assert_eq!(replica.buffered.len(), 1);
        assert!(replica.proposals.is_empty());
    }

    #[test]
    fn all_decisions_matching_own_state_completes_barrier() {
        let (mut replica, _leader_rx) = replica();
        replica.respond_decision(message::Proposal { slot: 0, command: command(0).into() });
        let reference = vec![(0, command(0).into())];
        replica.respond_all_decisions(reference);
        assert!(replica.barrier.is_done());
    }

    #[test]
    fn buffered_chats_drain_once_barrier_clears() {
        let (mut replica, mut leader_rx) = replica();
        replica.barrier = Barrier::set(Map::default());
        replica.respond_chat(command(9));
        assert!(leader_rx.try_recv().is_none());
        replica.barrier.reset();
        replica.drain_buffered();
        match leader_rx.try_recv() {
            Some(leader::In::Propose(p)) => assert_eq!(p.slot, 0),
            other => panic!("expected Propose, got {:?}", other),
        }
    }
}
