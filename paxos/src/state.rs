//! # Summary
//!
//! This module defines several traits that together define a state machine,
//! which the Paxos protocol then replicates. Library users must implement
//! the `State` trait for their state machine, and then create a `paxos`
//! instance using the `config` module.

/// Unique identifier.
pub trait Identifier: std::hash::Hash + std::fmt::Debug + Clone + Eq + Send + Sync {}

impl<T> Identifier for T where T: std::hash::Hash + std::fmt::Debug + Clone + Eq + Send + Sync {}

/// Operation that can be applied to a state machine. `client_id` identifies
/// the sender; `chat_id` is that client's own per-client monotonic counter,
/// so `(client_id, chat_id)` is a stable identity for the command even across
/// re-proposal at a different slot.
pub trait Command: Send + Clone + std::fmt::Debug {
    type ClientId: Identifier;
    type ChatId: Identifier;
    fn client_id(&self) -> Self::ClientId;
    fn chat_id(&self) -> Self::ChatId;
}

/// Result of applying an operation to a state machine.
pub trait Response: Send + std::fmt::Debug {}

impl<T> Response for T where T: Send + std::fmt::Debug {}

/// Replicated state machine. `execute` is called once per decided slot, in
/// slot order; it returns a response only when the issuing client should be
/// told something (a chat `Perform` always wants every client notified, which
/// is handled one layer up by the replica, not by `execute` itself).
pub trait State: Default + Send + 'static {
    type Command: Command;
    type Response: Response;
    fn execute(&mut self, slot: usize, command: Self::Command) -> Self::Response;
}
