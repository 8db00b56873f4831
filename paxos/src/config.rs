//! # Summary
//!
//! This module defines a single replicated Paxos server. A library user
//! creates a `Config` with a state implementation of their choice and the
//! shared ports file, then calls `run` to launch the server: it binds the
//! peer, client, and harness-control listeners, dials every other known
//! server, and spawns the long-lived acceptor/replica/leader activities.

use std::net::SocketAddr;
use std::time;

use tokio::net::{TcpListener, TcpStream};

use crate::internal;
use crate::ports::PortsFile;
use crate::shared;
use crate::state;
use crate::thread;
use crate::wire::WireCommand;

fn local(port: u16) -> SocketAddr {
    format!("127.0.0.1:{}", port).parse().expect("[INTERNAL ERROR]: invalid socket address")
}

/// Defines a single Paxos server with state type `S`, identified by `id`
/// among `ports.servers.len()` total servers.
pub struct Config<S> {
    id: usize,
    ports: PortsFile,
    timeout: time::Duration,
    _marker: std::marker::PhantomData<S>,
}

impl<S: state::State> Config<S>
where
    S::Command: WireCommand,
{
    /// Creates a new server with unique id `id`, reading its own and its
    /// peers' ports from `ports`.
    pub fn new(id: usize, ports: PortsFile) -> Self {
        Config { id, ports, timeout: time::Duration::from_secs(1), _marker: std::marker::PhantomData }
    }

    /// Configures the timeout used to detect unresponsive peer connections.
    pub fn with_timeout(mut self, timeout: time::Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The statically elected primary's id (spec §9, Open Question OQ-2:
    /// no election protocol is implemented; ready to be swapped for an
    /// elected value).
    pub fn get_primary_id(&self) -> usize {
        0
    }

    /// Launches the server; runs until the process is killed.
    pub async fn run(self) {
        let count = self.ports.servers.len();
        let self_id = self.id;
        let primary_id = self.get_primary_id();
        let timeout = self.timeout;
        let own_ports = self.ports.servers[self_id];

        let (acceptor_rx, acceptor_tx) = internal::new();
        let (leader_rx, leader_tx) = internal::new();
        let (_, scout_tx) = internal::new();
        let (replica_rx, replica_tx) = internal::new();

        let shared_tx: shared::Shared<S> = shared::Shared::new(self_id, scout_tx, replica_tx.clone(), acceptor_tx.clone());

        let acceptor = thread::acceptor::Acceptor::new(self_id, acceptor_rx, shared_tx.clone());
        let replica = thread::replica::Replica::new(self_id, primary_id, leader_tx.clone(), shared_tx.clone(), replica_rx);
        let leader = thread::leader::Leader::new(self_id, count, leader_rx, leader_tx.clone(), shared_tx.clone(), timeout);

        tokio::spawn(acceptor.run());
        tokio::spawn(replica.run());
        tokio::spawn(leader.run());

        let peer_listener = TcpListener::bind(local(own_ports.peer()))
            .await
            .expect("[INTERNAL ERROR]: failed to bind peer-listen port");
        let client_listener = TcpListener::bind(local(own_ports.client()))
            .await
            .expect("[INTERNAL ERROR]: failed to bind client-listen port");
        let control_listener = TcpListener::bind(local(own_ports.harness))
            .await
            .expect("[INTERNAL ERROR]: failed to bind harness-control port");

        // Accept incoming peer connections.
        {
            let acceptor_tx = acceptor_tx.clone();
            let shared_tx = shared_tx.clone();
            tokio::spawn(async move {
                loop {
                    match peer_listener.accept().await {
                        Ok((stream, addr)) => {
                            debug!("accepted peer connection from {}", addr);
                            let connecting = thread::peer::Connecting::new(self_id, stream, acceptor_tx.clone(), shared_tx.clone(), timeout);
                            tokio::spawn(connecting.run());
                        }
                        Err(error) => warn!("failed to accept peer connection: {}", error),
                    }
                }
            });
        }

        // Accept incoming client connections.
        {
            let replica_tx = replica_tx.clone();
            let shared_tx = shared_tx.clone();
            tokio::spawn(async move {
                loop {
                    match client_listener.accept().await {
                        Ok((stream, addr)) => {
                            debug!("accepted client connection from {}", addr);
                            let connecting = thread::client::Connecting::new(stream, replica_tx.clone(), shared_tx.clone());
                            tokio::spawn(connecting.run());
                        }
                        Err(error) => warn!("failed to accept client connection: {}", error),
                    }
                }
            });
        }

        // Accept the harness's single long-lived control connection.
        {
            let replica_tx = replica_tx.clone();
            let leader_tx = leader_tx.clone();
            tokio::spawn(async move {
                match control_listener.accept().await {
                    Ok((stream, addr)) => {
                        debug!("accepted harness-control connection from {}", addr);
                        let control = thread::control::Control::new(stream, replica_tx, leader_tx);
                        control.run().await;
                    }
                    Err(error) => warn!("failed to accept harness-control connection: {}", error),
                }
            });
        }

        // Dial every other known server on startup.
        for (peer_id, peer_ports) in self.ports.servers.iter().enumerate() {
            if peer_id == self_id {
                continue;
            }
            let acceptor_tx = acceptor_tx.clone();
            let shared_tx = shared_tx.clone();
            let addr = local(peer_ports.peer());
            tokio::spawn(async move {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        let connecting = thread::peer::Connecting::new(self_id, stream, acceptor_tx, shared_tx, timeout);
                        connecting.run().await;
                    }
                    Err(error) => warn!("failed to connect to peer {}: {}", peer_id, error),
                }
            });
        }

        std::future::pending::<()>().await;
    }
}
