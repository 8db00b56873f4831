//! # Summary
//!
//! This module implements the text wire format used for every socket in the
//! system: server-to-server Paxos traffic, client-to-replica chat traffic,
//! and harness-to-server/client control traffic. Each message is framed as
//!
//! ```text
//! TYPE<IF>field_1<IF>field_2...<MD>
//! ```
//!
//! where `<IF>` separates fields within one message and `<MD>` separates one
//! message from the next. A single `recv` may return several framed messages
//! back to back, or a partial one — `Codec` handles both by only consuming a
//! complete frame (up to and including the next `<MD>`) per `decode` call and
//! leaving everything else buffered, which is exactly what `tokio_util`'s
//! `Framed` expects.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::message::{Ballot, CommanderId, P1A, P1B, P2A, P2B, PValue, Proposal};
use crate::state;

/// Separates fields within one message (ASCII unit separator).
pub const FIELD_DELIM: char = '\u{1f}';
/// Separates one message from the next (ASCII record separator).
pub const MESSAGE_DELIM: char = '\u{1e}';

#[derive(thiserror::Error, Debug)]
pub enum WireError {
    #[error("malformed {0} message: {1}")]
    Malformed(&'static str, String),
    #[error("unknown message type: {0:?}")]
    UnknownType(String),
}

/// A command usable over the wire: reduces to (and rebuilds from) a flat,
/// ordered list of text fields. Chat commands flatten to exactly three
/// fields: client id, chat id, and message payload.
pub trait WireCommand: state::Command + Sized {
    fn encode_fields(&self) -> Vec<String>;
    fn decode_fields(fields: &[String]) -> Result<Self, WireError>;
}

/// Every message type recognized on the wire. `Adopted`/`Preempted`/`Propose`
/// are represented here for completeness against the protocol's full set of
/// recognized TYPE tokens, but this implementation never places them on a
/// socket: scouts and commanders are always spawned in-process by their
/// leader, and a replica only ever proposes to its own server's co-located
/// leader (see `DESIGN.md`, Open Question OQ-1).
#[derive(Debug, Clone, PartialEq)]
pub enum Message<C: state::Command> {
    P1a(P1A),
    P1b(P1B<C>),
    /// Carries the originating commander's id alongside the payload (spec
    /// §4.3/§4.4): a P2B otherwise only reports the acceptor's currently
    /// adopted ballot, which a rival's preemption can move past the
    /// ballot this exchange was started under, making it unusable as a
    /// routing key back to the right commander.
    P2a(CommanderId, P2A<C>),
    P2b(CommanderId, P2B),
    Propose(Proposal<C>),
    Decision(Proposal<C>),
    Adopted { ballot: Ballot, accepted: Vec<PValue<C>> },
    Preempted { ballot: Ballot },
    Chat(C),
    Response { slot: usize, command: C },
    AllClear,
    AllDecisions(Vec<(usize, C)>),
    ChatLog(Vec<C>),
    /// Peer-link keepalive; never forwarded anywhere, only kept from going
    /// quiet (spec §4, connection liveness).
    Ping(usize),
}

fn push_ballot(out: &mut String, ballot: Ballot) {
    out.push(FIELD_DELIM);
    out.push_str(&ballot.seq_num.to_string());
    out.push(FIELD_DELIM);
    out.push_str(&ballot.id.to_string());
}

fn push_commander_id(out: &mut String, c_id: CommanderId) {
    push_ballot(out, c_id.ballot);
    out.push(FIELD_DELIM);
    out.push_str(&c_id.slot.to_string());
}

fn push_raw_command<C: WireCommand>(out: &mut String, command: &C) {
    let fields = command.encode_fields();
    out.push(FIELD_DELIM);
    out.push_str(&fields.len().to_string());
    for field in fields {
        out.push(FIELD_DELIM);
        out.push_str(&field);
    }
}

fn push_command<C: WireCommand>(out: &mut String, command: &crate::message::Command<C>) {
    push_raw_command(out, &**command);
}

fn push_pvalue<C: WireCommand>(out: &mut String, pvalue: &PValue<C>) {
    out.push(FIELD_DELIM);
    out.push_str(&pvalue.slot.to_string());
    push_ballot(out, pvalue.ballot);
    push_command(out, &pvalue.command);
}

/// Renders one message as `TYPE<IF>field...<MD>`.
pub fn encode<C: WireCommand>(message: &Message<C>) -> String {
    let mut out = String::new();
    match message {
        Message::P1a(p1a) => {
            out.push_str("P1A");
            out.push(FIELD_DELIM);
            out.push_str(&p1a.from_leader_id.to_string());
            push_ballot(&mut out, p1a.ballot);
        }
        Message::P1b(p1b) => {
            out.push_str("P1B");
            out.push(FIELD_DELIM);
            out.push_str(&p1b.acceptor_id.to_string());
            push_ballot(&mut out, p1b.ballot);
            out.push(FIELD_DELIM);
            out.push_str(&p1b.accepted.len().to_string());
            for pvalue in &p1b.accepted {
                push_pvalue(&mut out, pvalue);
            }
        }
        Message::P2a(c_id, p2a) => {
            out.push_str("P2A");
            out.push(FIELD_DELIM);
            out.push_str(&p2a.from_leader_id.to_string());
            push_commander_id(&mut out, *c_id);
            push_pvalue(&mut out, &p2a.pvalue);
        }
        Message::P2b(c_id, p2b) => {
            out.push_str("P2B");
            push_commander_id(&mut out, *c_id);
            out.push(FIELD_DELIM);
            out.push_str(&p2b.acceptor_id.to_string());
            push_ballot(&mut out, p2b.ballot);
            out.push(FIELD_DELIM);
            out.push_str(&p2b.slot.to_string());
        }
        Message::Propose(proposal) => {
            out.push_str("PROPOSE");
            out.push(FIELD_DELIM);
            out.push_str(&proposal.slot.to_string());
            push_command(&mut out, &proposal.command);
        }
        Message::Decision(proposal) => {
            out.push_str("DECISION");
            out.push(FIELD_DELIM);
            out.push_str(&proposal.slot.to_string());
            push_command(&mut out, &proposal.command);
        }
        Message::Adopted { ballot, accepted } => {
            out.push_str("ADOPTED");
            push_ballot(&mut out, *ballot);
            out.push(FIELD_DELIM);
            out.push_str(&accepted.len().to_string());
            for pvalue in accepted {
                push_pvalue(&mut out, pvalue);
            }
        }
        Message::Preempted { ballot } => {
            out.push_str("PREEMPTED");
            push_ballot(&mut out, *ballot);
        }
        Message::Chat(command) => {
            out.push_str("CHAT");
            push_raw_command(&mut out, command);
        }
        Message::Response { slot, command } => {
            out.push_str("RESPONSE");
            out.push(FIELD_DELIM);
            out.push_str(&slot.to_string());
            push_raw_command(&mut out, command);
        }
        Message::AllClear => out.push_str("ALLCLEAR"),
        Message::AllDecisions(decisions) => {
            out.push_str("ALLDECISIONS");
            out.push(FIELD_DELIM);
            out.push_str(&decisions.len().to_string());
            for (slot, command) in decisions {
                out.push(FIELD_DELIM);
                out.push_str(&slot.to_string());
                push_raw_command(&mut out, command);
            }
        }
        Message::ChatLog(entries) => {
            out.push_str("CHATLOG");
            out.push(FIELD_DELIM);
            out.push_str(&entries.len().to_string());
            for command in entries {
                push_raw_command(&mut out, command);
            }
        }
        Message::Ping(id) => {
            out.push_str("PING");
            out.push(FIELD_DELIM);
            out.push_str(&id.to_string());
        }
    }
    out.push(MESSAGE_DELIM);
    out
}

struct FieldReader<'a> {
    fields: &'a [String],
    at: usize,
}

impl<'a> FieldReader<'a> {
    fn new(fields: &'a [String], kind: &'static str) -> Result<Self, WireError> {
        let _ = kind;
        Ok(FieldReader { fields, at: 0 })
    }

    fn next(&mut self, kind: &'static str) -> Result<&'a str, WireError> {
        let field = self
            .fields
            .get(self.at)
            .ok_or_else(|| WireError::Malformed(kind, "missing field".into()))?;
        self.at += 1;
        Ok(field.as_str())
    }

    fn next_usize(&mut self, kind: &'static str) -> Result<usize, WireError> {
        self.next(kind)?
            .parse()
            .map_err(|_| WireError::Malformed(kind, "expected integer".into()))
    }

    fn next_u64(&mut self, kind: &'static str) -> Result<u64, WireError> {
        self.next(kind)?
            .parse()
            .map_err(|_| WireError::Malformed(kind, "expected integer".into()))
    }

    fn next_ballot(&mut self, kind: &'static str) -> Result<Ballot, WireError> {
        Ok(Ballot { seq_num: self.next_u64(kind)?, id: self.next_usize(kind)? })
    }

    fn next_commander_id(&mut self, kind: &'static str) -> Result<CommanderId, WireError> {
        Ok(CommanderId { ballot: self.next_ballot(kind)?, slot: self.next_usize(kind)? })
    }

    fn next_command<C: WireCommand>(&mut self, kind: &'static str) -> Result<C, WireError> {
        let count = self.next_usize(kind)?;
        let mut fields = Vec::with_capacity(count);
        for _ in 0..count {
            fields.push(self.next(kind)?.to_string());
        }
        C::decode_fields(&fields)
    }

    fn next_pvalue<C: WireCommand>(&mut self, kind: &'static str) -> Result<PValue<C>, WireError> {
        let slot = self.next_usize(kind)?;
        let ballot = self.next_ballot(kind)?;
        let command = self.next_command::<C>(kind)?;
        Ok(PValue { slot, ballot, command: command.into() })
    }
}

/// Parses one already-delimited frame's body (without the trailing `<MD>`).
pub fn decode<C: WireCommand>(frame: &str) -> Result<Message<C>, WireError> {
    let mut parts = frame.split(FIELD_DELIM);
    let kind = parts.next().unwrap_or("");
    let fields: Vec<String> = parts.map(str::to_string).collect();
    let mut reader = FieldReader::new(&fields, "")?;
    match kind {
        "P1A" => Ok(Message::P1a(P1A {
            from_leader_id: reader.next_usize("P1A")?,
            ballot: reader.next_ballot("P1A")?,
        })),
        "P1B" => {
            let acceptor_id = reader.next_usize("P1B")?;
            let ballot = reader.next_ballot("P1B")?;
            let count = reader.next_usize("P1B")?;
            let mut accepted = Vec::with_capacity(count);
            for _ in 0..count {
                accepted.push(reader.next_pvalue::<C>("P1B")?);
            }
            Ok(Message::P1b(P1B { acceptor_id, ballot, accepted }))
        }
        "P2A" => {
            let from_leader_id = reader.next_usize("P2A")?;
            let c_id = reader.next_commander_id("P2A")?;
            let pvalue = reader.next_pvalue::<C>("P2A")?;
            Ok(Message::P2a(c_id, P2A { from_leader_id, pvalue }))
        }
        "P2B" => {
            let c_id = reader.next_commander_id("P2B")?;
            let p2b = P2B {
                acceptor_id: reader.next_usize("P2B")?,
                ballot: reader.next_ballot("P2B")?,
                slot: reader.next_usize("P2B")?,
            };
            Ok(Message::P2b(c_id, p2b))
        }
        "PROPOSE" => {
            let slot = reader.next_usize("PROPOSE")?;
            let command = reader.next_command::<C>("PROPOSE")?;
            Ok(Message::Propose(Proposal { slot, command: command.into() }))
        }
        "DECISION" => {
            let slot = reader.next_usize("DECISION")?;
            let command = reader.next_command::<C>("DECISION")?;
            Ok(Message::Decision(Proposal { slot, command: command.into() }))
        }
        "ADOPTED" => {
            let ballot = reader.next_ballot("ADOPTED")?;
            let count = reader.next_usize("ADOPTED")?;
            let mut accepted = Vec::with_capacity(count);
            for _ in 0..count {
                accepted.push(reader.next_pvalue::<C>("ADOPTED")?);
            }
            Ok(Message::Adopted { ballot, accepted })
        }
        "PREEMPTED" => Ok(Message::Preempted { ballot: reader.next_ballot("PREEMPTED")? }),
        "CHAT" => Ok(Message::Chat(reader.next_command::<C>("CHAT")?)),
        "RESPONSE" => {
            let slot = reader.next_usize("RESPONSE")?;
            let command = reader.next_command::<C>("RESPONSE")?;
            Ok(Message::Response { slot, command })
        }
        "ALLCLEAR" => Ok(Message::AllClear),
        "ALLDECISIONS" => {
            let count = reader.next_usize("ALLDECISIONS")?;
            let mut decisions = Vec::with_capacity(count);
            for _ in 0..count {
                let slot = reader.next_usize("ALLDECISIONS")?;
                let command = reader.next_command::<C>("ALLDECISIONS")?;
                decisions.push((slot, command));
            }
            Ok(Message::AllDecisions(decisions))
        }
        "CHATLOG" => {
            let count = reader.next_usize("CHATLOG")?;
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                entries.push(reader.next_command::<C>("CHATLOG")?);
            }
            Ok(Message::ChatLog(entries))
        }
        "PING" => Ok(Message::Ping(reader.next_usize("PING")?)),
        other => Err(WireError::UnknownType(other.to_string())),
    }
}

/// `tokio_util` codec pairing `encode`/`decode` with length-agnostic framing
/// on `<MD>`. Splits on the message delimiter first, field delimiter second,
/// exactly as the protocol requires, and tolerates several frames arriving in
/// one `read()` — `decode` is just called again for whatever remains.
pub struct Codec<C> {
    _marker: std::marker::PhantomData<C>,
}

impl<C> Default for Codec<C> {
    fn default() -> Self {
        Codec { _marker: std::marker::PhantomData }
    }
}

impl<C: WireCommand> Decoder for Codec<C> {
    type Item = Message<C>;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let delim_pos = src.iter().position(|&b| b == MESSAGE_DELIM as u8);
        let Some(pos) = delim_pos else { return Ok(None) };
        let frame = src.split_to(pos);
        src.advance(1); // consume the delimiter itself
        let text = String::from_utf8_lossy(&frame);
        decode::<C>(&text)
            .map(Some)
            .map_err(|error| std::io::Error::new(std::io::ErrorKind::InvalidData, error))
    }
}

impl<C: WireCommand> Encoder<Message<C>> for Codec<C> {
    type Error = std::io::Error;

    fn encode(&mut self, item: Message<C>, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let text = encode(&item);
        dst.reserve(text.len());
        dst.put_slice(text.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::tests::TestCommand;

    fn command(client_id: usize, chat_id: usize, payload: &str) -> TestCommand {
        TestCommand { client_id, chat_id, payload: payload.to_string() }
    }

    fn pvalue(slot: usize, ballot: Ballot, command: TestCommand) -> PValue<TestCommand> {
        PValue { slot, ballot, command: command.into() }
    }

    fn roundtrip(message: Message<TestCommand>) {
        let frame = encode(&message);
        assert!(frame.ends_with(MESSAGE_DELIM));
        let body = &frame[..frame.len() - 1];
        let decoded = decode::<TestCommand>(body).expect("frame should decode");
        assert_eq!(decoded, message);
    }

    #[test]
    fn roundtrips_p1a() {
        roundtrip(Message::P1a(P1A { from_leader_id: 1, ballot: Ballot { seq_num: 3, id: 1 } }));
    }

    #[test]
    fn roundtrips_p1b() {
        let ballot = Ballot { seq_num: 2, id: 0 };
        let accepted = vec![pvalue(5, ballot, command(1, 0, "hi"))];
        roundtrip(Message::P1b(P1B { acceptor_id: 0, ballot, accepted }));
    }

    #[test]
    fn roundtrips_p2a() {
        let ballot = Ballot { seq_num: 1, id: 2 };
        let c_id = CommanderId { ballot, slot: 7 };
        roundtrip(Message::P2a(c_id, P2A { from_leader_id: 2, pvalue: pvalue(7, ballot, command(2, 1, "hello there")) }));
    }

    #[test]
    fn roundtrips_p2b() {
        let c_id = CommanderId { ballot: Ballot { seq_num: 4, id: 1 }, slot: 9 };
        roundtrip(Message::P2b(c_id, P2B { acceptor_id: 1, ballot: Ballot { seq_num: 6, id: 3 }, slot: 9 }));
    }

    #[test]
    fn roundtrips_ping() {
        roundtrip(Message::Ping(3));
    }

    #[test]
    fn roundtrips_propose() {
        roundtrip(Message::Propose(Proposal { slot: 3, command: command(0, 0, "first").into() }));
    }

    #[test]
    fn roundtrips_decision() {
        roundtrip(Message::Decision(Proposal { slot: 3, command: command(0, 0, "first").into() }));
    }

    #[test]
    fn roundtrips_adopted() {
        let ballot = Ballot { seq_num: 6, id: 0 };
        let accepted = vec![pvalue(1, ballot, command(3, 0, "x")), pvalue(2, ballot, command(3, 1, "y"))];
        roundtrip(Message::Adopted { ballot, accepted });
    }

    #[test]
    fn roundtrips_preempted() {
        roundtrip(Message::Preempted { ballot: Ballot { seq_num: 8, id: 3 } });
    }

    #[test]
    fn roundtrips_chat() {
        roundtrip(Message::Chat(command(4, 2, "a field with spaces")));
    }

    #[test]
    fn roundtrips_response() {
        roundtrip(Message::Response { slot: 10, command: command(4, 2, "delivered") });
    }

    #[test]
    fn roundtrips_allclear() {
        roundtrip(Message::AllClear);
    }

    #[test]
    fn roundtrips_alldecisions() {
        let decisions = vec![(0, command(0, 0, "a")), (1, command(1, 0, "b"))];
        roundtrip(Message::AllDecisions(decisions));
    }

    #[test]
    fn roundtrips_chatlog() {
        let entries = vec![command(0, 0, "a"), command(1, 0, "b"), command(0, 1, "c")];
        roundtrip(Message::ChatLog(entries));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let error = decode::<TestCommand>("BOGUS\u{1f}1").unwrap_err();
        assert!(matches!(error, WireError::UnknownType(ref kind) if kind == "BOGUS"));
    }

    #[test]
    fn truncated_frame_is_malformed() {
        let error = decode::<TestCommand>("P1A\u{1f}1").unwrap_err();
        assert!(matches!(error, WireError::Malformed("P1A", _)));
    }

    #[test]
    fn codec_splits_two_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        buf.put_slice(encode(&Message::AllClear).as_bytes());
        buf.put_slice(encode(&Message::Chat(command(1, 0, "second"))).as_bytes());

        let mut codec = Codec::<TestCommand>::default();
        let first = codec.decode(&mut buf).unwrap().expect("first frame present");
        assert_eq!(first, Message::AllClear);

        // Only the first frame should have been consumed.
        assert!(!buf.is_empty());
        let second = codec.decode(&mut buf).unwrap().expect("second frame present");
        assert_eq!(second, Message::Chat(command(1, 0, "second")));

        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_returns_none_on_partial_frame() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"P1A\x1f1\x1f3\x1f1");
        let mut codec = Codec::<TestCommand>::default();
        assert!(codec.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 9);
    }
}
