//! Async role-task integration tests: each spins up a small real cluster of
//! `Config::run` servers on loopback TCP and drives it like a client or the
//! harness would, rather than poking individual role tasks directly.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use paxos::wire::{self, WireCommand, WireError, MESSAGE_DELIM};
use paxos::{ClientPorts, Config, PortsFile, ServerPorts};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Msg {
    client_id: usize,
    chat_id: usize,
    payload: String,
}

impl paxos::Command for Msg {
    type ClientId = usize;
    type ChatId = usize;
    fn client_id(&self) -> usize {
        self.client_id
    }
    fn chat_id(&self) -> usize {
        self.chat_id
    }
}

impl WireCommand for Msg {
    fn encode_fields(&self) -> Vec<String> {
        vec![self.client_id.to_string(), self.chat_id.to_string(), self.payload.clone()]
    }
    fn decode_fields(fields: &[String]) -> Result<Self, WireError> {
        match fields {
            [client_id, chat_id, payload] => Ok(Msg {
                client_id: client_id.parse().map_err(|_| WireError::Malformed("MSG", "bad client_id".into()))?,
                chat_id: chat_id.parse().map_err(|_| WireError::Malformed("MSG", "bad chat_id".into()))?,
                payload: payload.clone(),
            }),
            _ => Err(WireError::Malformed("MSG", "expected 3 fields".into())),
        }
    }
}

#[derive(Default)]
struct Log {
    messages: Vec<Msg>,
}

impl paxos::State for Log {
    type Command = Msg;
    type Response = ();
    fn execute(&mut self, _slot: usize, command: Msg) {
        self.messages.push(command);
    }
}

fn ports(base: u16, count: usize) -> PortsFile {
    let servers = (0..count)
        .map(|i| {
            let start = base + (i as u16) * 10;
            ServerPorts { harness: start, roles: [start + 1, start + 2, start + 3, start + 4, start + 5, start + 6, start + 7] }
        })
        .collect();
    PortsFile { harness: base - 1, clients: Vec::<ClientPorts>::new(), servers }
}

async fn connect_retrying(port: u16) -> TcpStream {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(stream) = TcpStream::connect(("127.0.0.1", port)).await {
                return stream;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("server never came up")
}

async fn read_frame(stream: &mut TcpStream, buf: &mut Vec<u8>) -> String {
    loop {
        if let Some(pos) = buf.iter().position(|&b| b == MESSAGE_DELIM as u8) {
            let frame: Vec<u8> = buf.drain(..=pos).collect();
            return String::from_utf8_lossy(&frame[..frame.len() - 1]).into_owned();
        }
        let mut chunk = [0u8; 256];
        let n = stream.read(&mut chunk).await.expect("connection dropped mid-frame");
        assert!(n > 0, "connection closed mid-frame");
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn spawn_cluster(ports: &PortsFile) {
    for id in 0..ports.servers.len() {
        let config = Config::<Log>::new(id, ports.clone()).with_timeout(Duration::from_millis(150));
        tokio::spawn(config.run());
    }
}

#[tokio::test]
async fn cluster_commits_a_chat_and_broadcasts_the_response() {
    let ports = ports(21300, 3);
    spawn_cluster(&ports);

    let primary = ports.servers[0].client();
    let mut stream = connect_retrying(primary).await;

    let chat = Msg { client_id: 7, chat_id: 0, payload: "hello cluster".to_string() };
    let frame = wire::encode(&wire::Message::Chat(chat.clone()));
    stream.write_all(frame.as_bytes()).await.unwrap();

    let mut buf = Vec::new();
    let reply = tokio::time::timeout(Duration::from_secs(5), read_frame(&mut stream, &mut buf))
        .await
        .expect("never received a response");

    match wire::decode::<Msg>(&reply).unwrap() {
        wire::Message::Response { slot, command } => {
            assert_eq!(slot, 0);
            assert_eq!(command, chat);
        }
        other => panic!("expected a Response, got {:?}", other),
    }
}

#[tokio::test]
async fn all_clear_echoes_back_once_every_replica_is_quiescent() {
    let ports = ports(21400, 3);
    spawn_cluster(&ports);

    // Commit one chat first so the barrier has a non-empty reference to agree on.
    let primary = ports.servers[0].client();
    let mut client = connect_retrying(primary).await;
    let chat = Msg { client_id: 1, chat_id: 0, payload: "quorum check".to_string() };
    client.write_all(wire::encode(&wire::Message::Chat(chat)).as_bytes()).await.unwrap();
    let mut client_buf = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), read_frame(&mut client, &mut client_buf))
        .await
        .expect("chat was never committed");

    let mut controls: Vec<TcpStream> = Vec::new();
    for server in &ports.servers {
        controls.push(connect_retrying(server.harness).await);
    }

    controls[0]
        .write_all(format!("ALLCLEAR{}", MESSAGE_DELIM).as_bytes())
        .await
        .unwrap();

    for control in controls.iter_mut() {
        let mut buf = Vec::new();
        let frame = tokio::time::timeout(Duration::from_secs(5), read_frame(control, &mut buf))
            .await
            .expect("server never reported all-clear");
        assert_eq!(frame, "ALLCLEAR");
    }
}

#[test]
fn field_reader_rejects_garbage_client_id() {
    let error = Msg::decode_fields(&["not-a-number".to_string(), "0".to_string(), "x".to_string()]).unwrap_err();
    assert!(matches!(error, WireError::Malformed("MSG", _)));
}
