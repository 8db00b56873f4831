//! # Summary
//!
//! This module defines external connections to clients: forwards inbound
//! `CHAT` commands to the replica, and delivers every `Response` the
//! replica broadcasts back over the wire.

use futures::{SinkExt, StreamExt};
use futures::stream::{SplitSink, SplitStream};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::internal;
use crate::message;
use crate::shared::Shared;
use crate::state;
use crate::state::Command as _;
use crate::thread::replica;
use crate::wire::{self, WireCommand};

type Frame<C> = Framed<TcpStream, wire::Codec<C>>;

/// What the replica broadcasts to every connected client on `Perform`.
#[derive(Derivative)]
#[derivative(Clone(bound = ""), Debug(bound = ""))]
pub struct Out<C: state::Command> {
    pub slot: usize,
    pub command: message::Command<C>,
}

/// A client connection whose id isn't yet known — waits for its first
/// `CHAT` to learn it, matching one-shot connections from the `chatroom`
/// client binary.
pub struct Connecting<S: state::State> {
    frame: Frame<S::Command>,
    replica_tx: internal::Tx<replica::In<S::Command>>,
    shared_tx: Shared<S>,
}

impl<S: state::State> Connecting<S>
where
    S::Command: WireCommand,
{
    pub fn new(stream: TcpStream, replica_tx: internal::Tx<replica::In<S::Command>>, shared_tx: Shared<S>) -> Self {
        Connecting { frame: Framed::new(stream, wire::Codec::default()), replica_tx, shared_tx }
    }

    /// Waits for the client's first `CHAT`, registers it with the shared
    /// hub, and runs it as a `Client` for the rest of the connection.
    pub async fn run(mut self) {
        loop {
            match self.frame.next().await {
                Some(Ok(wire::Message::Chat(command))) => {
                    let client_id = command.client_id();
                    info!("connected to client {:?}", client_id);
                    let (rx, tx) = internal::new();
                    self.shared_tx.write().connect_client(client_id.clone(), tx);
                    self.replica_tx.send(replica::In::Chat(command));
                    let client = Client { client_id, rx, frame: self.frame, replica_tx: self.replica_tx, shared_tx: self.shared_tx };
                    client.run().await;
                    return;
                }
                Some(Ok(other)) => warn!("unexpected pre-registration message: {:?}", other),
                Some(Err(error)) => {
                    warn!("malformed frame from unregistered client: {}", error);
                    return;
                }
                None => return,
            }
        }
    }
}

/// A client connection with a known id, registered with the shared hub.
struct Client<S: state::State> {
    client_id: <S::Command as state::Command>::ClientId,
    rx: internal::Rx<Out<S::Command>>,
    frame: Frame<S::Command>,
    replica_tx: internal::Tx<replica::In<S::Command>>,
    shared_tx: Shared<S>,
}

impl<S: state::State> Client<S>
where
    S::Command: WireCommand,
{
    async fn run(self) {
        let Client { client_id, rx, frame, replica_tx, shared_tx } = self;
        let (mut sink, mut stream): (SplitSink<Frame<S::Command>, wire::Message<S::Command>>, SplitStream<Frame<S::Command>>) =
            frame.split();
        let mut rx = rx;
        loop {
            tokio::select! {
                incoming = stream.next() => {
                    match incoming {
                        Some(Ok(wire::Message::Chat(command))) => replica_tx.send(replica::In::Chat(command)),
                        Some(Ok(other)) => warn!("unexpected message from client {:?}: {:?}", client_id, other),
                        Some(Err(error)) => {
                            warn!("malformed frame from client {:?}: {}", client_id, error);
                            break;
                        }
                        None => break,
                    }
                }
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(out) => {
                            let message = wire::Message::Response { slot: out.slot, command: out.command.inner() };
                            if sink.send(message).await.is_err() {
                                warn!("failed to send response to client {:?}", client_id);
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        }
        info!("disconnected from client {:?}", client_id);
        shared_tx.write().disconnect_client(&client_id);
    }
}
