//! # Summary
//!
//! The `harness` binary: a line-oriented driver that reads test commands
//! from standard input, spawns `chatroom-server`/`chatroom-client`
//! processes, and coordinates the all-clear barrier and the per-client
//! chat log dump, per `original_source/master.cpp`.

#[macro_use] extern crate log;

mod command;
mod control;
mod server;

use std::collections::HashMap as Map;
use std::io::Write;

use structopt::StructOpt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use chatroom::Chat;
use command::Command;
use paxos::wire::{FIELD_DELIM, MESSAGE_DELIM};

#[derive(StructOpt)]
#[structopt(name = "harness")]
struct Opt {
    /// Path to the `chatroom-server` binary
    #[structopt(long = "server")]
    server: std::path::PathBuf,

    /// Path to the `chatroom-client` binary
    #[structopt(long = "client")]
    client: std::path::PathBuf,

    /// Path to the shared ports file
    #[structopt(short = "f", long = "ports", default_value = "ports.txt")]
    ports: std::path::PathBuf,

    /// Directory to write per-client chat log files into
    #[structopt(short = "d", long = "log-dir", default_value = ".")]
    log_dir: std::path::PathBuf,

    /// Logging output verbosity for spawned processes
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbose: u8,
}

/// An outbound connection the harness holds open for the life of the run,
/// with whatever bytes have arrived past the last complete frame.
struct Connection {
    stream: TcpStream,
    buf: Vec<u8>,
}

impl Connection {
    async fn connect(port: u16) -> Self {
        loop {
            match TcpStream::connect(("127.0.0.1", port)).await {
                Ok(stream) => return Connection { stream, buf: Vec::new() },
                Err(error) => {
                    warn!("failed to connect to port {}: {}, retrying", port, error);
                    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
                }
            }
        }
    }

    async fn write(&mut self, frame: &str) {
        if let Err(error) = self.stream.write_all(frame.as_bytes()).await {
            warn!("failed to write frame: {}", error);
        }
    }

    async fn read_frame(&mut self) -> Option<String> {
        match control::read_frame(&mut self.stream, &mut self.buf).await {
            Ok(frame) => frame,
            Err(error) => {
                warn!("failed to read frame: {}", error);
                None
            }
        }
    }
}

struct State {
    opt: Opt,
    num_servers: usize,
    num_clients: usize,
    servers: Map<usize, server::Process>,
    clients: Map<usize, server::Process>,
    server_control: Map<usize, Connection>,
    client_control: Map<usize, Connection>,
    chat_logs: Map<usize, std::fs::File>,
}

impl State {
    fn new(opt: Opt) -> Self {
        State {
            opt,
            num_servers: 0,
            num_clients: 0,
            servers: Map::default(),
            clients: Map::default(),
            server_control: Map::default(),
            client_control: Map::default(),
            chat_logs: Map::default(),
        }
    }

    async fn execute(&mut self, command: Command) {
        info!("executing {:?}", command);
        match command {
            Command::Start { servers, clients } => self.start(servers, clients).await,
            Command::SendMessage { client_id, message } => self.send_message(client_id, message).await,
            Command::CrashServer { server_id } => self.crash_server(server_id),
            Command::RestartServer { server_id } => self.restart_server(server_id).await,
            Command::AllClear => self.all_clear().await,
            Command::TimeBombLeader { k } => self.time_bomb_leader(k).await,
            Command::PrintChatLog { client_id } => self.print_chat_log(client_id).await,
        }
    }

    async fn start(&mut self, servers: usize, clients: usize) {
        self.num_servers = servers;
        self.num_clients = clients;

        let ports = paxos::PortsFile::read(&self.opt.ports, clients, servers)
            .expect("[INTERNAL ERROR]: failed to read ports file");

        for id in 0..servers {
            let process = server::Process::spawn(&self.opt.server, id, &self.opt.ports, servers, clients, self.opt.verbose);
            self.servers.insert(id, process);
        }

        for id in 0..clients {
            let process = server::Process::spawn(&self.opt.client, id, &self.opt.ports, servers, clients, self.opt.verbose);
            self.clients.insert(id, process);
            let path = self.opt.log_dir.join(format!("chat_log_{}", id));
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .expect("[INTERNAL ERROR]: failed to open chat log file");
            self.chat_logs.insert(id, file);
        }

        for (id, server) in ports.servers.iter().enumerate() {
            self.server_control.insert(id, Connection::connect(server.harness).await);
        }
        for (id, client) in ports.clients.iter().enumerate() {
            self.client_control.insert(id, Connection::connect(client.listen).await);
        }
    }

    async fn send_message(&mut self, client_id: usize, message: String) {
        let Some(connection) = self.client_control.get_mut(&client_id) else {
            warn!("no such client {}", client_id);
            return;
        };
        connection.write(&format!("SENDMESSAGE{}{}{}", FIELD_DELIM, message, MESSAGE_DELIM)).await;
    }

    fn crash_server(&mut self, server_id: usize) {
        self.servers.remove(&server_id);
        self.server_control.remove(&server_id);
    }

    async fn restart_server(&mut self, server_id: usize) {
        let process = server::Process::spawn(
            &self.opt.server,
            server_id,
            &self.opt.ports,
            self.num_servers,
            self.num_clients,
            self.opt.verbose,
        );
        self.servers.insert(server_id, process);

        let ports = paxos::PortsFile::read(&self.opt.ports, self.num_clients, self.num_servers)
            .expect("[INTERNAL ERROR]: failed to read ports file");
        let port = ports.servers[server_id].harness;
        self.server_control.insert(server_id, Connection::connect(port).await);
    }

    async fn all_clear(&mut self) {
        let Some(primary) = self.server_control.get_mut(&0) else {
            warn!("no primary server connection");
            return;
        };
        primary.write(&format!("ALLCLEAR{}", MESSAGE_DELIM)).await;

        for id in 0..self.num_servers {
            let Some(connection) = self.server_control.get_mut(&id) else { continue };
            match connection.read_frame().await {
                Some(frame) if frame == "ALLCLEAR" => debug!("server {} reported all-clear done", id),
                Some(other) => warn!("unexpected reply from server {} during all-clear: {:?}", id, other),
                None => warn!("server {} closed its control connection during all-clear", id),
            }
        }
    }

    async fn time_bomb_leader(&mut self, k: u64) {
        let Some(primary) = self.server_control.get_mut(&0) else {
            warn!("no primary server connection");
            return;
        };
        primary.write(&format!("TIMEBOMBLEADER{}{}{}", FIELD_DELIM, k, MESSAGE_DELIM)).await;
    }

    async fn print_chat_log(&mut self, client_id: usize) {
        let Some(connection) = self.client_control.get_mut(&client_id) else {
            warn!("no such client {}", client_id);
            return;
        };
        connection.write(&format!("PRINTCHATLOG{}", MESSAGE_DELIM)).await;

        let Some(frame) = connection.read_frame().await else {
            warn!("client {} closed its control connection during print-chat-log", client_id);
            return;
        };

        let entries = match paxos::wire::decode::<Chat>(&frame) {
            Ok(paxos::wire::Message::ChatLog(entries)) => entries,
            Ok(other) => {
                warn!("unexpected reply from client {}: {:?}", client_id, other);
                return;
            }
            Err(error) => {
                warn!("malformed chat log from client {}: {}", client_id, error);
                return;
            }
        };

        let Some(file) = self.chat_logs.get_mut(&client_id) else { return };
        for entry in entries {
            writeln!(file, "{} {}: {}", entry.client_id, entry.chat_id, entry.payload).ok();
        }
        writeln!(file, "-------------").ok();
        file.flush().ok();
    }
}

async fn next_line() -> Option<String> {
    tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        match std::io::stdin().read_line(&mut line) {
            Ok(0) => None,
            Ok(_) => Some(line),
            Err(_) => None,
        }
    })
    .await
    .unwrap_or(None)
}

#[tokio::main]
async fn main() {
    let opt = Opt::from_args();
    let level = match opt.verbose {
        0 => log::LevelFilter::Off,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    fern::Dispatch::new()
        .format(|out, message, record| out.finish(format_args!("[M][{}][{}]: {}", record.level(), record.target(), message)))
        .level_for("harness", level)
        .chain(std::io::stdout())
        .apply()
        .unwrap();

    let mut state = State::new(opt);

    while let Some(line) = next_line().await {
        if line.trim().is_empty() {
            continue;
        }
        match line.parse::<Command>() {
            Ok(command) => state.execute(command).await,
            Err(error) => warn!("{}", error),
        }
    }
}
