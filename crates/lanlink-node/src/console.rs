//! Line-oriented console for the `lanlink` binary.
//!
//! Stands in for a graphical front end: it prints observer events and turns
//! typed commands into calls on [`LanNode`].

use std::path::PathBuf;

use lanlink_core::PeerAddress;
use lanlink_node::application::observer::{ConnectionObserver, TransferOutcome};
use lanlink_node::node::LanNode;
use thiserror::Error;

pub const HELP: &str = "\
commands:
  peers                 peers announced on the LAN
  sessions              managed sessions and their state
  connect <ip>          open a session (only the greater address dials)
  disconnect <ip>       close a session
  msg <ip> <text>       send a text message
  file <ip> <path>      send a file
  help                  this text
  quit                  shut down";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Empty,
    Peers,
    Sessions,
    Connect(PeerAddress),
    Disconnect(PeerAddress),
    Message { to: PeerAddress, text: String },
    File { to: PeerAddress, path: PathBuf },
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("unknown command '{0}'; type 'help'")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
}

/// Parses one console line.
pub fn parse_command(line: &str) -> Result<ConsoleCommand, CommandError> {
    let line = line.trim();
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let (target, tail) = match rest.split_once(char::is_whitespace) {
        Some((target, tail)) => (target, tail.trim_start()),
        None => (rest, ""),
    };

    match verb.to_ascii_lowercase().as_str() {
        "" => Ok(ConsoleCommand::Empty),
        "peers" | "ls" => Ok(ConsoleCommand::Peers),
        "sessions" => Ok(ConsoleCommand::Sessions),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "quit" | "exit" => Ok(ConsoleCommand::Quit),
        "connect" if !target.is_empty() => Ok(ConsoleCommand::Connect(target.into())),
        "connect" => Err(CommandError::Usage("connect <ip>")),
        "disconnect" if !target.is_empty() => Ok(ConsoleCommand::Disconnect(target.into())),
        "disconnect" => Err(CommandError::Usage("disconnect <ip>")),
        "msg" if !target.is_empty() && !tail.is_empty() => Ok(ConsoleCommand::Message {
            to: target.into(),
            text: tail.to_string(),
        }),
        "msg" => Err(CommandError::Usage("msg <ip> <text>")),
        "file" if !target.is_empty() && !tail.is_empty() => Ok(ConsoleCommand::File {
            to: target.into(),
            path: PathBuf::from(tail),
        }),
        "file" => Err(CommandError::Usage("file <ip> <path>")),
        other => Err(CommandError::Unknown(other.to_string())),
    }
}

/// Runs a parsed command against `node`.  `Quit` is the caller's business.
pub async fn execute(node: &LanNode, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Empty | ConsoleCommand::Quit => {}
        ConsoleCommand::Help => println!("{HELP}"),
        ConsoleCommand::Peers => {
            let mut peers = node.online_peers();
            peers.sort();
            if peers.is_empty() {
                println!("no peers announced yet");
            }
            for peer in peers {
                println!("  {peer}");
            }
        }
        ConsoleCommand::Sessions => {
            let sessions = node.sessions();
            if sessions.is_empty() {
                println!("no sessions");
            }
            for s in sessions {
                println!("  {:<16} {:?} ({:?})", s.address.as_str(), s.state, s.role);
            }
        }
        ConsoleCommand::Connect(peer) => node.connect_to(peer).await,
        ConsoleCommand::Disconnect(peer) => node.disconnect_from(&peer),
        ConsoleCommand::Message { to, text } => node.send_message_to(&to, &text).await,
        ConsoleCommand::File { to, path } => node.send_file_to(&to, &path).await,
    }
}

/// Prints every event to stdout.
#[derive(Debug, Default)]
pub struct ConsoleObserver;

impl ConnectionObserver for ConsoleObserver {
    fn on_message(&self, address: &PeerAddress, text: &str) {
        println!("[{address}] {text}");
    }

    fn on_status_change(&self, address: &PeerAddress, online: bool) {
        let state = if online { "online" } else { "offline" };
        println!("* {address} is {state}");
    }

    fn on_file_progress(&self, address: &PeerAddress, file_name: &str, percent: u8) {
        println!("  {file_name} <-> {address}: {percent}%");
    }

    fn on_transfer_finished(&self, address: &PeerAddress, file_name: &str, outcome: &TransferOutcome) {
        match outcome {
            TransferOutcome::Sent => println!("* sent {file_name} to {address}"),
            TransferOutcome::Saved { path } => {
                println!("* saved {file_name} from {address} to {}", path.display())
            }
            TransferOutcome::Failed { reason } => {
                println!("* transfer of {file_name} with {address} failed: {reason}")
            }
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
