//! # Summary
//!
//! The `chatroom-client` binary: holds one connection to the primary
//! server for submitting chats and receiving broadcast responses, and one
//! persistent connection from the harness for `SENDMESSAGE`/`PRINTCHATLOG`
//! (see `control.rs`).

#[macro_use] extern crate log;

mod control;

use futures::{SinkExt, StreamExt};
use futures::stream::{SplitSink, SplitStream};
use structopt::StructOpt;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

use chatroom::Chat;
use control::Inbound;

type Frame = Framed<TcpStream, paxos::wire::Codec<Chat>>;

#[derive(StructOpt)]
#[structopt(name = "chatroom-client")]
struct Opt {
    /// Unique client id
    #[structopt(short = "i", long = "id")]
    id: usize,

    /// Path to the shared ports file
    #[structopt(short = "f", long = "ports", default_value = "ports.txt")]
    ports: std::path::PathBuf,

    /// Total number of servers
    #[structopt(short = "s", long = "servers")]
    servers: usize,

    /// Total number of clients
    #[structopt(short = "c", long = "clients")]
    clients: usize,

    /// Logging level
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbosity: u8,
}

async fn connect_to_primary(port: u16) -> TcpStream {
    loop {
        match TcpStream::connect(("127.0.0.1", port)).await {
            Ok(stream) => return stream,
            Err(error) => {
                warn!("failed to connect to primary: {}, retrying", error);
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    let id = opt.id;
    let level = match opt.verbosity {
        0 => log::LevelFilter::Off,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!("[C{}][{}][{}]: {}", id, record.level(), record.target(), message))
        })
        .level_for("chatroom", level)
        .chain(std::io::stdout())
        .apply()
        .unwrap();

    let ports = paxos::PortsFile::read(&opt.ports, opt.clients, opt.servers)
        .expect("[INTERNAL ERROR]: failed to read ports file");

    let own_ports = ports.clients[id];
    let primary_ports = ports.servers[0];

    let server_stream = connect_to_primary(primary_ports.client()).await;
    let (server_sink, server_stream): (SplitSink<Frame, paxos::wire::Message<Chat>>, SplitStream<Frame>) =
        Framed::new(server_stream, paxos::wire::Codec::default()).split();

    let listener = TcpListener::bind(("127.0.0.1", own_ports.listen))
        .await
        .expect("[INTERNAL ERROR]: failed to bind harness-listen port");
    info!("waiting for harness to connect");
    let (harness_stream, _addr) = listener.accept().await.expect("[INTERNAL ERROR]: failed to accept harness connection");
    let (mut harness_reader, mut harness_writer) = harness_stream.into_split();

    let mut log: Vec<Chat> = Vec::new();
    let mut next_chat_id = 0;
    let mut server_sink = server_sink;
    let mut server_stream = server_stream;
    let mut buf = Vec::new();

    loop {
        tokio::select! {
            incoming = server_stream.next() => {
                match incoming {
                    Some(Ok(paxos::wire::Message::Response { slot, command })) => {
                        debug!("delivered slot {}: {:?}", slot, command);
                        log.push(command);
                    }
                    Some(Ok(other)) => warn!("unexpected message from server: {:?}", other),
                    Some(Err(error)) => {
                        warn!("malformed frame from server: {}", error);
                        return;
                    }
                    None => {
                        warn!("server connection closed");
                        return;
                    }
                }
            }
            frame = control::read_frame(&mut harness_reader, &mut buf) => {
                match frame {
                    Ok(Some(text)) => match control::decode(&text) {
                        Some(Inbound::SendMessage(payload)) => {
                            let chat = Chat { client_id: id, chat_id: next_chat_id, payload };
                            next_chat_id += 1;
                            if server_sink.send(paxos::wire::Message::Chat(chat)).await.is_err() {
                                warn!("failed to submit chat to primary");
                            }
                        }
                        Some(Inbound::PrintChatLog) => {
                            let reply = paxos::wire::encode(&paxos::wire::Message::ChatLog(log.clone()));
                            if harness_writer.write_all(reply.as_bytes()).await.is_err() {
                                warn!("failed to reply to harness with chat log");
                            }
                        }
                        None => warn!("unrecognized harness frame: {:?}", text),
                    },
                    Ok(None) => {
                        info!("harness connection closed");
                        return;
                    }
                    Err(error) => {
                        warn!("harness connection error: {}", error);
                        return;
                    }
                }
            }
        }
    }
}
