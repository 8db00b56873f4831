//! # Summary
//!
//! This module defines message and identifier types for server-to-server and
//! server-to-client communication. `Ballot`, `PValue`, `P1A`, `P1B`, `P2A`, and
//! `P2B` are equivalent to those described in Paxos Made Moderately Complex.
//! `Command` is a Rust implementation detail wrapping a user-supplied command
//! with the equality/hash semantics Paxos needs: two commands are the "same"
//! proposal iff they share a client id and a client-local (chat) id.

use crate::state;

/// Wrapper around `state::Command` that defines equality and hashing based on
/// a command's client id and its client-local id, not its payload.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Command<C: state::Command>(C);

impl<C: state::Command> Command<C> {
    pub fn inner(self) -> C {
        self.0
    }
}

impl<C: state::Command> From<C> for Command<C> {
    fn from(command: C) -> Self {
        Command(command)
    }
}

impl<C: state::Command> Eq for Command<C> {}

impl<C: state::Command> PartialEq for Command<C> {
    fn eq(&self, rhs: &Self) -> bool {
        self.0.client_id() == rhs.0.client_id() && self.0.chat_id() == rhs.0.chat_id()
    }
}

impl<C: state::Command> std::hash::Hash for Command<C> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.client_id().hash(state);
        self.0.chat_id().hash(state);
    }
}

impl<C: state::Command> std::ops::Deref for Command<C> {
    type Target = C;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A ballot is totally ordered first by `seq_num`, then by the owning
/// leader's `id`. A fresh leader starts at `seq_num = 0`.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ballot {
    /// Leader-local sequence number.
    pub seq_num: u64,
    /// Owning leader's id.
    pub id: usize,
}

impl Ballot {
    /// Returns the strictly greater ballot a leader adopts after being
    /// preempted by `other`.
    pub fn bump_past(other: Ballot, id: usize) -> Ballot {
        Ballot { seq_num: other.seq_num + 1, id }
    }
}

/// A commander is uniquely determined by the ballot its leader held when
/// spawning it and the slot it targets.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommanderId {
    /// Associated ballot.
    pub ballot: Ballot,
    /// Targeted slot.
    pub slot: usize,
}

/// A proposed binding from slot to command under a specific ballot — the
/// acceptor's unit of accepted evidence.
#[derive(Derivative)]
#[derivative(
    Clone(bound = ""),
    Debug(bound = ""),
    Hash(bound = ""),
    PartialEq(bound = ""),
    Eq(bound = "")
)]
pub struct PValue<C: state::Command> {
    /// Targeted slot.
    pub slot: usize,
    /// Associated ballot.
    pub ballot: Ballot,
    /// Proposed command.
    pub command: Command<C>,
}

/// Phase 1a: query from scout to acceptor.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct P1A {
    /// Id of the leader whose scout sent this request.
    pub from_leader_id: usize,
    /// Ballot being acquired.
    pub ballot: Ballot,
}

/// Phase 1b: response from acceptor to scout.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""), PartialEq(bound = ""), Eq(bound = ""))]
pub struct P1B<C: state::Command> {
    pub acceptor_id: usize,
    pub ballot: Ballot,
    pub accepted: Vec<PValue<C>>,
}

/// Phase 2a: query from commander to acceptor.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""), PartialEq(bound = ""), Eq(bound = ""))]
pub struct P2A<C: state::Command> {
    pub from_leader_id: usize,
    pub pvalue: PValue<C>,
}

/// Phase 2b: response from acceptor to commander. `ballot` reports whatever
/// the acceptor currently has promised, which a rival's Phase 1a can move
/// past the ballot this exchange started under — so it is never usable as a
/// routing key. The commander to route a reply to is instead carried
/// alongside this payload as a `CommanderId`, echoed back unchanged by the
/// acceptor (see `thread::acceptor::respond_p2a`, `thread::peer::In::P2b`).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct P2B {
    /// Acceptor id.
    pub acceptor_id: usize,
    /// Acceptor's currently adopted ballot.
    pub ballot: Ballot,
    /// Slot the originating Phase 2a request targeted.
    pub slot: usize,
}

/// A proposed binding from slot to command, independent of any ballot — what
/// a replica sends its leader, and what a commander's decision carries.
#[derive(Derivative)]
#[derivative(
    Clone(bound = ""),
    Debug(bound = ""),
    Hash(bound = ""),
    PartialEq(bound = ""),
    Eq(bound = "")
)]
pub struct Proposal<C: state::Command> {
    /// Targeted slot.
    pub slot: usize,
    /// Proposed command.
    pub command: Command<C>,
}
