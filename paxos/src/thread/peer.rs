//! # Summary
//!
//! This module defines external connections to other servers: the single
//! multiplexed link per server pair that carries every Paxos sub-protocol
//! message (P1A/P1B/P2A/P2B/Decision) plus all-clear barrier coordination.
//!
//! A newly accepted connection doesn't yet know which peer dialed it, so
//! `Connecting` first exchanges a small fixed-width id preamble (distinct
//! from the `TYPE<IF>field<MD>` message wire format) before handing the
//! stream off to `Frame` for the rest of its life as a `Peer`.

use std::time;

use futures::{SinkExt, StreamExt};
use futures::stream::{SplitSink, SplitStream};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{interval_at, Instant, Interval};
use tokio_util::codec::Framed;

use crate::internal;
use crate::message;
use crate::shared::Shared;
use crate::state;
use crate::thread::acceptor;
use crate::wire::{self, WireCommand};

type Frame<C> = Framed<TcpStream, wire::Codec<C>>;

/// Peers exchange every Paxos sub-protocol message plus barrier
/// coordination; `Adopted`/`Preempted`/`Propose` never cross this link
/// (see `DESIGN.md`, Open Question OQ-1). `Ping` is a keepalive: the link
/// carries no other traffic once leaders are adopted and every proposal is
/// decided, so each side sends one every `timeout` to keep the connection
/// from looking idle; a dead peer is detected by a socket error on send or
/// recv, never by read-idle.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub enum In<C: state::Command> {
    P1a(message::P1A),
    P1b(message::P1B<C>),
    P2a(message::CommanderId, message::P2A<C>),
    P2b(message::CommanderId, message::P2B),
    Decision(message::Proposal<C>),
    AllDecisions(Vec<(usize, message::Command<C>)>),
    Ping(usize),
}

fn to_wire<C: WireCommand>(message: In<C>) -> wire::Message<C> {
    match message {
        In::P1a(p1a) => wire::Message::P1a(p1a),
        In::P1b(p1b) => wire::Message::P1b(p1b),
        In::P2a(c_id, p2a) => wire::Message::P2a(c_id, p2a),
        In::P2b(c_id, p2b) => wire::Message::P2b(c_id, p2b),
        In::Decision(proposal) => wire::Message::Decision(proposal),
        In::AllDecisions(decisions) => {
            wire::Message::AllDecisions(decisions.into_iter().map(|(slot, command)| (slot, command.inner())).collect())
        }
        In::Ping(id) => wire::Message::Ping(id),
    }
}

/// Exchanges the id preamble with a freshly accepted or dialed stream.
async fn handshake(mut stream: TcpStream, self_id: usize) -> std::io::Result<(TcpStream, usize)> {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&(self_id as u64).to_le_bytes());
    stream.write_all(&buf).await?;
    stream.read_exact(&mut buf).await?;
    let peer_id = u64::from_le_bytes(buf) as usize;
    Ok((stream, peer_id))
}

/// A connection that has exchanged the id preamble but isn't yet registered
/// with the shared hub.
pub struct Connecting<S: state::State> {
    self_id: usize,
    stream: TcpStream,
    acceptor_tx: internal::Tx<acceptor::In<S::Command>>,
    shared_tx: Shared<S>,
    timeout: time::Duration,
}

impl<S: state::State> Connecting<S>
where
    S::Command: WireCommand,
{
    pub fn new(
        self_id: usize,
        stream: TcpStream,
        acceptor_tx: internal::Tx<acceptor::In<S::Command>>,
        shared_tx: Shared<S>,
        timeout: time::Duration,
    ) -> Self {
        Connecting { self_id, stream, acceptor_tx, shared_tx, timeout }
    }

    /// Completes the handshake and promotes this connection to a `Peer`.
    pub async fn run(self) {
        let id = self.self_id;
        match handshake(self.stream, id).await {
            Ok((stream, peer_id)) => {
                let peer = Peer::new(id, peer_id, stream, self.acceptor_tx, self.shared_tx, self.timeout);
                peer.run().await;
            }
            Err(error) => warn!("peer handshake failed: {}", error),
        }
    }
}

/// A live connection to a known peer, registered with the shared hub.
pub struct Peer<S: state::State> {
    self_id: usize,
    peer_id: usize,
    rx: internal::Rx<In<S::Command>>,
    sink: SplitSink<Frame<S::Command>, wire::Message<S::Command>>,
    stream: SplitStream<Frame<S::Command>>,
    acceptor_tx: internal::Tx<acceptor::In<S::Command>>,
    shared_tx: Shared<S>,
    ping: Interval,
}

impl<S: state::State> Peer<S>
where
    S::Command: WireCommand,
{
    pub fn new(
        self_id: usize,
        peer_id: usize,
        stream: TcpStream,
        acceptor_tx: internal::Tx<acceptor::In<S::Command>>,
        shared_tx: Shared<S>,
        timeout: time::Duration,
    ) -> Self {
        let (sink, stream) = Framed::new(stream, wire::Codec::default()).split();
        let (rx, tx) = internal::new();
        shared_tx.write().connect_peer(peer_id, tx);
        info!("connected to {}", peer_id);
        let ping = interval_at(Instant::now() + timeout, timeout);
        Peer { self_id, peer_id, rx, sink, stream, acceptor_tx, shared_tx, ping }
    }

    /// Forwards traffic between the socket and this server's other
    /// activities until the connection drops. A dead-but-silent peer is
    /// never inferred from read-idle — only a socket error on send or recv
    /// ends the connection — since `ping` is what keeps an otherwise quiet
    /// link looking alive.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.ping.tick() => {
                    if let Err(error) = self.sink.send(to_wire(In::Ping(self.self_id))).await {
                        warn!("failed to ping peer {}: {}", self.peer_id, error);
                        return;
                    }
                }
                incoming = self.stream.next() => {
                    match incoming {
                        Some(Ok(message)) => self.respond_incoming(message),
                        Some(Err(error)) => {
                            warn!("malformed frame from {}: {}", self.peer_id, error);
                            return;
                        }
                        None => {
                            debug!("peer {} closed the connection", self.peer_id);
                            return;
                        }
                    }
                }
                message = self.rx.recv() => {
                    match message {
                        Some(message) => {
                            if let Err(error) = self.sink.send(to_wire(message)).await {
                                warn!("failed to send to peer {}: {}", self.peer_id, error);
                                return;
                            }
                        }
                        None => return,
                    }
                }
            }
        }
    }

    fn respond_incoming(&self, message: wire::Message<S::Command>) {
        trace!("received {:?} from {}", message, self.peer_id);
        match message {
            wire::Message::P1a(p1a) => self.acceptor_tx.send(acceptor::In::P1a(p1a)),
            wire::Message::P2a(c_id, p2a) => self.acceptor_tx.send(acceptor::In::P2a(c_id, p2a)),
            wire::Message::P1b(p1b) => self.shared_tx.read().forward(In::P1b(p1b)),
            wire::Message::P2b(c_id, p2b) => self.shared_tx.read().forward(In::P2b(c_id, p2b)),
            wire::Message::Decision(proposal) => self.shared_tx.read().forward(In::Decision(proposal)),
            wire::Message::AllDecisions(decisions) => {
                let decisions = decisions.into_iter().map(|(slot, command)| (slot, command.into())).collect();
                self.shared_tx.read().forward(In::AllDecisions(decisions));
            }
            wire::Message::Ping(_) => {}
            other => warn!("unexpected message on peer link from {}: {:?}", self.peer_id, other),
        }
    }
}

impl<S: state::State> Drop for Peer<S> {
    fn drop(&mut self) {
        info!("disconnected from {}", self.peer_id);
        self.shared_tx.write().disconnect_peer(self.peer_id);
    }
}
