//! # Summary
//!
//! The `chatroom-server` binary: one Paxos replica hosting the chat log
//! state machine, bootstrapped entirely from the shared ports file.

use structopt::StructOpt;

#[derive(StructOpt)]
#[structopt(name = "chatroom-server")]
struct Opt {
    /// Unique server id
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

    /// Peer connection read timeout, in milliseconds
    #[structopt(short = "t", long = "timeout", default_value = "1000")]
    timeout: u64,

    /// Logging level
    #[structopt(short = "v", long = "verbose", parse(from_occurrences))]
    verbosity: u8,
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
            out.finish(format_args!("[{}][{}][{}]: {}", id, record.level(), record.target(), message))
        })
        .level_for("paxos", level)
        .level_for("chatroom", level)
        .level_for("mio", log::LevelFilter::Off)
        .chain(std::io::stdout())
        .apply()
        .unwrap();

    let ports = paxos::PortsFile::read(&opt.ports, opt.clients, opt.servers)
        .expect("[INTERNAL ERROR]: failed to read ports file");

    let config = paxos::Config::<chatroom::ChatLog>::new(id, ports)
        .with_timeout(std::time::Duration::from_millis(opt.timeout));

    config.run().await;
}
