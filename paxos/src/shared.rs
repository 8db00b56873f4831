//! # Summary
//!
//! This module implements a central hub for intra-server message
//! forwarding. We wrap the central `State` type with `Arc<RwLock<T>>`
//! to share the connections between concurrently running tasks.

use std::collections::HashMap as Map;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::internal::Tx;
use crate::message;
use crate::state;
use crate::thread::{acceptor, client, commander, peer, replica, scout};

/// Thread-safe wrapper around `State` forwarding hub.
#[derive(Derivative)]
#[derivative(Clone(bound = ""))]
pub struct Shared<S: state::State>(Arc<RwLock<State<S>>>);

impl<S: state::State> Shared<S> {
    /// Initializes a message hub with the provided transmission channels.
    pub fn new(
        id: usize,
        scout_tx: Tx<scout::In<S::Command>>,
        replica_tx: Tx<replica::In<S::Command>>,
        acceptor_tx: Tx<acceptor::In<S::Command>>,
    ) -> Self {
        Shared(Arc::new(RwLock::new(State::new(id, scout_tx, replica_tx, acceptor_tx))))
    }

    /// Acquires a read lock on the underlying state.
    pub fn read(&self) -> RwLockReadGuard<State<S>> {
        self.0.read()
    }

    /// Acquires a write lock on the underlying state.
    pub fn write(&self) -> RwLockWriteGuard<State<S>> {
        self.0.write()
    }
}

/// Collection of intra-server transmitting channels.
pub struct State<S: state::State> {
    id: usize,
    peer_txs: Map<usize, Tx<peer::In<S::Command>>>,
    client_txs: Map<<S::Command as state::Command>::ClientId, Tx<client::Out<S::Command>>>,
    commander_txs: Map<message::CommanderId, Tx<commander::In>>,
    scout_tx: Tx<scout::In<S::Command>>,
    replica_tx: Tx<replica::In<S::Command>>,
    acceptor_tx: Tx<acceptor::In<S::Command>>,
}

impl<S: state::State> State<S> {
    /// Initializes a message hub with the provided transmission channels.
    pub fn new(
        id: usize,
        scout_tx: Tx<scout::In<S::Command>>,
        replica_tx: Tx<replica::In<S::Command>>,
        acceptor_tx: Tx<acceptor::In<S::Command>>,
    ) -> Self {
        State {
            id,
            peer_txs: Map::default(),
            client_txs: Map::default(),
            commander_txs: Map::default(),
            scout_tx,
            replica_tx,
            acceptor_tx,
        }
    }

    /// Registers the provided peer channel with this hub.
    pub fn connect_peer(&mut self, id: usize, tx: Tx<peer::In<S::Command>>) {
        self.peer_txs.insert(id, tx);
    }

    /// Disconnects the provided peer from this hub.
    pub fn disconnect_peer(&mut self, id: usize) {
        self.peer_txs.remove(&id);
    }

    /// Registers the provided client channel with this hub.
    pub fn connect_client(&mut self, id: <S::Command as state::Command>::ClientId, tx: Tx<client::Out<S::Command>>) {
        self.client_txs.insert(id, tx);
    }

    /// Disconnects the provided client from this hub.
    pub fn disconnect_client(&mut self, id: &<S::Command as state::Command>::ClientId) {
        self.client_txs.remove(id);
    }

    /// Registers the provided commander with this hub.
    pub fn connect_commander(&mut self, id: message::CommanderId, tx: Tx<commander::In>) {
        self.commander_txs.insert(id, tx);
    }

    /// Disconnects the provided commander from this hub.
    pub fn disconnect_commander(&mut self, id: message::CommanderId) {
        self.commander_txs.remove(&id);
    }

    /// Replaces the scout channel associated with this hub. A leader calls
    /// this whenever it spawns a fresh scout, so stray replies from a
    /// preempted scout's acceptors land on the new one.
    pub fn replace_scout(&mut self, tx: Tx<scout::In<S::Command>>) {
        self.scout_tx = tx;
    }

    /// Forwards a message to the provided commander, if it is still alive.
    pub fn send_commander(&self, c_id: message::CommanderId, message: commander::In) {
        if let Some(tx) = self.commander_txs.get(&c_id) {
            tx.try_send(message);
        }
    }

    /// Forwards a message to the replica task.
    pub fn send_replica(&self, message: replica::In<S::Command>) {
        self.replica_tx.send(message);
    }

    /// Forwards a message to the scout task, if one is still alive.
    pub fn send_scout(&self, message: scout::In<S::Command>) {
        self.scout_tx.try_send(message);
    }

    /// Forwards a message to the acceptor task.
    pub fn send_acceptor(&self, message: acceptor::In<S::Command>) {
        self.acceptor_tx.send(message);
    }

    /// Forwards a response to a connected client, if it is still attached.
    pub fn send_client(&self, id: <S::Command as state::Command>::ClientId, message: client::Out<S::Command>) {
        if let Some(tx) = self.client_txs.get(&id) {
            tx.try_send(message);
        }
    }

    /// Broadcasts a response to every connected client.
    pub fn broadcast_client(&self, message: client::Out<S::Command>) {
        for tx in self.client_txs.values() {
            tx.try_send(message.clone());
        }
    }

    /// Forwards a message to an external peer server (or to ourselves, if
    /// `id` is our own id).
    pub fn send(&self, id: usize, message: peer::In<S::Command>) {
        if id == self.id {
            self.forward(message);
        } else if let Some(tx) = self.peer_txs.get(&id) {
            tx.try_send(message);
        }
    }

    /// Dispatches an inbound peer message to the appropriate local task.
    /// `P2b`'s `c_id` is routed on as received, never reconstructed from the
    /// acceptor's reported ballot: that ballot is whatever the acceptor has
    /// most recently promised, which on preemption is a strictly higher
    /// rival ballot than the one the replying commander was created under.
    pub fn forward(&self, message: peer::In<S::Command>) {
        match message {
            peer::In::P1a(p1a) => self.send_acceptor(acceptor::In::P1a(p1a)),
            peer::In::P1b(p1b) => self.send_scout(p1b),
            peer::In::P2a(c_id, p2a) => self.send_acceptor(acceptor::In::P2a(c_id, p2a)),
            peer::In::P2b(c_id, p2b) => self.send_commander(c_id, p2b),
            peer::In::Decision(proposal) => self.send_replica(replica::In::Decision(proposal)),
            peer::In::AllDecisions(decisions) => self.send_replica(replica::In::AllDecisions(decisions)),
            peer::In::Ping(_) => {}
        }
    }

    /// Forwards a message to the provided list of peer servers.
    pub fn narrowcast<'a, T>(&self, ids: T, message: peer::In<S::Command>)
    where
        T: IntoIterator<Item = &'a usize>,
    {
        for id in ids.into_iter() {
            self.send(*id, message.clone());
        }
    }

    /// Forwards a message to all connected peer servers, as well as to our
    /// own co-located roles.
    pub fn broadcast(&self, message: peer::In<S::Command>) {
        for tx in self.peer_txs.values() {
            tx.try_send(message.clone());
        }
        self.forward(message);
    }
}
