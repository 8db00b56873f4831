//! # Summary
//!
//! This module abstracts over internal connections between a server's
//! sub-tasks (acceptor, leader, replica, and the one-shot scouts/commanders
//! the leader spawns).
//!
//! Backed by `tokio::sync::mpsc`'s unbounded channels. Since sends never
//! block and the only failure mode is a dropped receiver, `Tx::send` treats
//! that as a logic error and panics, matching the teacher's
//! `futures::sync::mpsc`-backed original; `Tx::try_send` is available for the
//! handful of call sites (a scout or commander that may have already wound
//! down after reaching a majority) where a dropped receiver is expected.

use tokio::sync::mpsc;

/// Intra-server receiving channel.
#[derive(Debug)]
pub struct Rx<T>(mpsc::UnboundedReceiver<T>);

/// Intra-server transmission channel. All clones send to the same receiving end.
#[derive(Derivative)]
#[derivative(Clone(bound = ""))]
#[derive(Debug)]
pub struct Tx<T>(mpsc::UnboundedSender<T>);

/// Create a new pair of linked receiving and transmitting channels.
pub fn new<T>() -> (Rx<T>, Tx<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Rx(rx), Tx(tx))
}

impl<T> Tx<T> {
    /// Force a message through the channel. Panics if the receiving end has
    /// been dropped.
    pub fn send(&self, message: T) {
        self.0.send(message).expect("[INTERNAL ERROR]: receiver dropped");
    }

    /// Attempt to send a message through the channel. Does nothing if the
    /// receiving end has already been dropped.
    pub fn try_send(&self, message: T) {
        let _ = self.0.send(message);
    }
}

impl<T> Rx<T> {
    /// Receives the next message, or `None` once every `Tx` has been dropped.
    pub async fn recv(&mut self) -> Option<T> {
        self.0.recv().await
    }

    /// Non-blocking receive, for tests driving a role's channels synchronously.
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<T> {
        self.0.try_recv().ok()
    }
}
