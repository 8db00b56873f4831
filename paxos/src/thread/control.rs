//! # Summary
//!
//! This module implements the harness-control channel: a small ad hoc line
//! protocol distinct from the inter-role wire format in `wire.rs`. `ALLCLEAR`
//! is its only token drawn from that format (reused verbatim, per spec §6 —
//! it's a recognized inter-role `TYPE` token as well as a harness command
//! name); `TIMEBOMBLEADER` has no inter-role wire counterpart, since it
//! never crosses a Paxos-role connection, so it is parsed here instead of
//! being added to `wire::Message`.
//!
//! Every server accepts one long-lived connection from the harness on its
//! harness-control port (see `ports::ServerPorts::harness`) and holds it for
//! the life of the process: inbound frames drive the all-clear barrier and
//! the timebomb fault injector, while a periodic poll of the replica's
//! barrier state drives an outbound `ALLCLEAR` echo once this server
//! reaches `Done` (spec §4.6, "a per-role flag visible to the harness").

use std::time;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::oneshot;

use crate::internal;
use crate::state;
use crate::thread::{leader, replica};
use crate::wire::{FIELD_DELIM, MESSAGE_DELIM};

const POLL_INTERVAL: time::Duration = time::Duration::from_millis(20);

enum Inbound {
    AllClear,
    TimeBomb(u64),
}

fn decode(frame: &str) -> Option<Inbound> {
    let mut fields = frame.split(FIELD_DELIM);
    match fields.next()? {
        "ALLCLEAR" => Some(Inbound::AllClear),
        "TIMEBOMBLEADER" => fields.next()?.parse().ok().map(Inbound::TimeBomb),
        _ => None,
    }
}

/// Reads one `<MD>`-delimited frame from `reader`, or `None` on EOF.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>> {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == MESSAGE_DELIM as u8) {
            let frame: Vec<u8> = buf.drain(..=pos).collect();
            return Ok(Some(String::from_utf8_lossy(&frame[..frame.len() - 1]).into_owned()));
        }
        let mut chunk = [0u8; 256];
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Ok(None);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

/// Drives one server's harness-control connection for the lifetime of the
/// process.
pub struct Control<S: state::State> {
    stream: TcpStream,
    replica_tx: internal::Tx<replica::In<S::Command>>,
    leader_tx: internal::Tx<leader::In<S::Command>>,
}

impl<S: state::State> Control<S> {
    pub fn new(
        stream: TcpStream,
        replica_tx: internal::Tx<replica::In<S::Command>>,
        leader_tx: internal::Tx<leader::In<S::Command>>,
    ) -> Self {
        Control { stream, replica_tx, leader_tx }
    }

    pub async fn run(self) {
        let (mut reader, mut writer) = tokio::io::split(self.stream);
        let mut buf = Vec::new();
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        loop {
            tokio::select! {
                _ = poll.tick() => {
                    if self.check_done().await && !send_done(&mut writer).await {
                        return;
                    }
                }
                frame = read_frame(&mut reader, &mut buf) => {
                    match frame {
                        Ok(Some(text)) => self.respond_inbound(&text),
                        Ok(None) => return,
                        Err(error) => {
                            warn!("harness-control connection error: {}", error);
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn check_done(&self) -> bool {
        let (tx, rx) = oneshot::channel();
        self.replica_tx.send(replica::In::CheckDone(tx));
        rx.await.unwrap_or(false)
    }

    fn respond_inbound(&self, text: &str) {
        match decode(text) {
            Some(Inbound::AllClear) => self.replica_tx.send(replica::In::AllClear),
            Some(Inbound::TimeBomb(k)) => self.leader_tx.send(leader::In::TimeBomb(k)),
            None => warn!("unrecognized harness-control frame: {:?}", text),
        }
    }
}

async fn send_done<W: AsyncWrite + Unpin>(writer: &mut W) -> bool {
    let frame = format!("ALLCLEAR{}", MESSAGE_DELIM);
    writer.write_all(frame.as_bytes()).await.is_ok()
}
