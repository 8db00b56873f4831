//! # Summary
//!
//! The application-level state machine replicated by `paxos`: a single
//! growing log of chat messages, each identified by the sending client's id
//! and that client's own per-message counter.

use paxos::wire::{WireCommand, WireError};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Chat {
    pub client_id: usize,
    pub chat_id: usize,
    pub payload: String,
}

impl paxos::Command for Chat {
    type ClientId = usize;
    type ChatId = usize;
    fn client_id(&self) -> usize {
        self.client_id
    }
    fn chat_id(&self) -> usize {
        self.chat_id
    }
}

impl WireCommand for Chat {
    fn encode_fields(&self) -> Vec<String> {
        vec![self.client_id.to_string(), self.chat_id.to_string(), self.payload.clone()]
    }

    fn decode_fields(fields: &[String]) -> Result<Self, WireError> {
        match fields {
            [client_id, chat_id, payload] => Ok(Chat {
                client_id: client_id.parse().map_err(|_| WireError::Malformed("CHAT", "bad client_id".into()))?,
                chat_id: chat_id.parse().map_err(|_| WireError::Malformed("CHAT", "bad chat_id".into()))?,
                payload: payload.clone(),
            }),
            _ => Err(WireError::Malformed("CHAT", "expected 3 fields".into())),
        }
    }
}

/// The replicated log: every decided chat, in slot order.
#[derive(Default)]
pub struct ChatLog {
    pub messages: Vec<Chat>,
}

impl paxos::State for ChatLog {
    type Command = Chat;
    type Response = ();
    fn execute(&mut self, _slot: usize, command: Chat) {
        self.messages.push(command);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_round_trips_through_wire_fields() {
        let chat = Chat { client_id: 3, chat_id: 7, payload: "hello".to_string() };
        let fields = chat.encode_fields();
        let decoded = Chat::decode_fields(&fields).unwrap();
        assert_eq!(chat, decoded);
    }

    #[test]
    fn execute_appends_in_call_order() {
        let mut log = ChatLog::default();
        log.execute(0, Chat { client_id: 0, chat_id: 0, payload: "hello".to_string() });
        log.execute(1, Chat { client_id: 1, chat_id: 0, payload: "world".to_string() });
        assert_eq!(log.messages.len(), 2);
        assert_eq!(log.messages[0].payload, "hello");
        assert_eq!(log.messages[1].payload, "world");
    }
}
