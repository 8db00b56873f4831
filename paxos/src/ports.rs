//! # Summary
//!
//! This module reads the ports file shared between the harness and every
//! spawned server/client process. Format (whitespace-separated integers):
//! the harness's own port, then one `(listen, chat)` pair per client, then
//! eight ports per server — the server's harness-control port followed by
//! the seven role ports (acceptor, scout, commander, leader, replica, and
//! two spares), matching `original_source/master.cpp::ReadPortsFile`.
//!
//! This implementation multiplexes every cross-server Paxos message over a
//! single peer connection per server pair (see `thread::peer`), so of the
//! seven role ports only the first (aliased as the peer-listen port) and
//! the fifth (aliased as the client-listen port, where `thread::client`
//! accepts incoming chat connections) are actually bound; the remaining
//! role ports are parsed for format fidelity and otherwise unused. See
//! `DESIGN.md` for the rationale.

use std::io::Read;

#[derive(thiserror::Error, Debug)]
pub enum PortsError {
    #[error("could not read ports file: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed ports file: {0}")]
    Malformed(String),
}

/// A client's two assigned ports: `listen` (harness control) and `chat`
/// (unused by this implementation, parsed for format fidelity).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ClientPorts {
    pub listen: u16,
    pub chat: u16,
}

/// A server's eight assigned ports.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ServerPorts {
    /// Harness-control port (`CRASHSERVER`/`RESTARTSERVER`/`ALLCLEAR`/`TIMEBOMBLEADER`).
    pub harness: u16,
    /// Seven role ports: acceptor, scout, commander, leader, replica, two spares.
    pub roles: [u16; 7],
}

impl ServerPorts {
    /// The single multiplexed port used for all cross-server Paxos traffic.
    pub fn peer(&self) -> u16 {
        self.roles[0]
    }

    /// The port clients dial to submit chats and receive responses.
    pub fn client(&self) -> u16 {
        self.roles[4]
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortsFile {
    pub harness: u16,
    pub clients: Vec<ClientPorts>,
    pub servers: Vec<ServerPorts>,
}

impl PortsFile {
    /// Reads and parses a ports file with `num_clients` client entries and
    /// `num_servers` server entries.
    pub fn read<P: AsRef<std::path::Path>>(
        path: P,
        num_clients: usize,
        num_servers: usize,
    ) -> Result<Self, PortsError> {
        let mut contents = String::new();
        std::fs::File::open(path)?.read_to_string(&mut contents)?;
        Self::parse(&contents, num_clients, num_servers)
    }

    fn parse(contents: &str, num_clients: usize, num_servers: usize) -> Result<Self, PortsError> {
        let mut tokens = contents.split_whitespace();
        let mut next = || {
            tokens
                .next()
                .ok_or_else(|| PortsError::Malformed("unexpected end of file".into()))
                .and_then(|token| {
                    token
                        .parse::<u16>()
                        .map_err(|_| PortsError::Malformed(format!("expected port, got {:?}", token)))
                })
        };

        let harness = next()?;

        let mut clients = Vec::with_capacity(num_clients);
        for _ in 0..num_clients {
            let listen = next()?;
            let chat = next()?;
            clients.push(ClientPorts { listen, chat });
        }

        let mut servers = Vec::with_capacity(num_servers);
        for _ in 0..num_servers {
            let harness = next()?;
            let mut roles = [0u16; 7];
            for slot in roles.iter_mut() {
                *slot = next()?;
            }
            servers.push(ServerPorts { harness, roles });
        }

        Ok(PortsFile { harness, clients, servers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_file() {
        let contents = "9000 9100 9101 9200 9201 20000 20001 20002 20003 20004 20005 20006";
        let parsed = PortsFile::parse(contents, 1, 1).unwrap();
        assert_eq!(parsed.harness, 9000);
        assert_eq!(parsed.clients, vec![ClientPorts { listen: 9100, chat: 9101 }]);
        assert_eq!(parsed.servers.len(), 1);
        assert_eq!(parsed.servers[0].harness, 9200);
        assert_eq!(parsed.servers[0].roles, [9201, 20000, 20001, 20002, 20003, 20004, 20005]);
        assert_eq!(parsed.servers[0].peer(), 9201);
        assert_eq!(parsed.servers[0].client(), 20003);
    }

    #[test]
    fn rejects_truncated_file() {
        let contents = "9000 9100";
        assert!(PortsFile::parse(contents, 1, 1).is_err());
    }

    #[test]
    fn rejects_non_integer_token() {
        let contents = "9000 abc 9101";
        assert!(PortsFile::parse(contents, 1, 1).is_err());
    }
}
