//! # Summary
//!
//! The harness dials one persistent connection to each client process and
//! drives it with two commands, matching `original_source/master.cpp`'s
//! `SendMessageToClient`/`PrintChatLog` flow: `SENDMESSAGE` carries free text
//! for this client to submit as a chat, `PRINTCHATLOG` asks for the client's
//! locally observed log. Neither is a recognized inter-role `TYPE` token (see
//! `paxos::wire`), so this reuses only the `FIELD_DELIM`/`MESSAGE_DELIM`
//! constants, the same approach as `paxos`'s own harness-control channel.
//!
//! The reply to `PRINTCHATLOG` *is* a recognized token: the client answers
//! with a literal `paxos::wire::Message::ChatLog` frame, reusing
//! `paxos::wire::encode` directly.

use paxos::wire::{FIELD_DELIM, MESSAGE_DELIM};

pub enum Inbound {
    SendMessage(String),
    PrintChatLog,
}

pub fn decode(frame: &str) -> Option<Inbound> {
    let mut fields = frame.splitn(2, FIELD_DELIM);
    match fields.next()? {
        "SENDMESSAGE" => Some(Inbound::SendMessage(fields.next()?.to_string())),
        "PRINTCHATLOG" => Some(Inbound::PrintChatLog),
        _ => None,
    }
}

/// Reads one `<MD>`-delimited frame from `reader`, or `None` on EOF.
pub async fn read_frame<R: tokio::io::AsyncRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
) -> std::io::Result<Option<String>> {
    use tokio::io::AsyncReadExt;
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sendmessage_with_free_text() {
        let frame = format!("SENDMESSAGE{}hello there", FIELD_DELIM);
        match decode(&frame) {
            Some(Inbound::SendMessage(text)) => assert_eq!(text, "hello there"),
            _ => panic!("expected SendMessage"),
        }
    }

    #[test]
    fn decodes_printchatlog() {
        let frame = "PRINTCHATLOG".to_string();
        assert!(matches!(decode(&frame), Some(Inbound::PrintChatLog)));
    }

    #[test]
    fn rejects_unknown_token() {
        assert!(decode("BOGUS").is_none());
    }
}
