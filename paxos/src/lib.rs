#[macro_use] extern crate derivative;
#[macro_use] extern crate log;

mod barrier;
mod config;
mod internal;
mod message;
mod ports;
mod shared;
mod state;
mod thread;

/// Text wire format shared by every socket in the system: inter-server
/// Paxos traffic, client-replica chat traffic, and harness control traffic.
pub mod wire;

pub use crate::config::Config;
pub use crate::ports::{ClientPorts, PortsError, PortsFile, ServerPorts};
pub use crate::state::{Command, Identifier, Response, State};
