//! Operator commands typed into a running node.
use anyhow::{anyhow, Result};
use log::warn;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};

use crate::chord::routing::RouteDecision;
use crate::chord::Chord;
use crate::key_space::FileId;

pub const HELP: &str = "Commands: request <file>, store <file>, status, help, quit";

/// Commands accepted on the node's standard input
#[derive(Debug, PartialEq, Eq)]
pub enum ConsoleCommand {
    Request(FileId),
    Store(FileId),
    /// Print the node's current view of the ring
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    /// Parses one line of operator input. Command names are case-insensitive.
    pub fn parse(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some(command) = parts.first() else {
            return Err(anyhow!("empty command"));
        };

        match (command.to_lowercase().as_str(), parts.len()) {
            ("quit", 1) => Ok(ConsoleCommand::Quit),
            ("status", 1) => Ok(ConsoleCommand::Status),
            ("help", 1) => Ok(ConsoleCommand::Help),
            ("request", 2) => Ok(ConsoleCommand::Request(parse_file(parts[1])?)),
            ("store", 2) => Ok(ConsoleCommand::Store(parse_file(parts[1])?)),
            ("request", _) | ("store", _) => Err(anyhow!(
                "{} requires exactly one argument: {} <file>",
                command,
                command.to_lowercase()
            )),
            _ => Err(anyhow!("Unknown command. {}", HELP)),
        }
    }
}

/// Why the console stopped reading
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator asked the node to leave the ring
    Quit,
    /// Input ended, the node keeps running
    InputClosed,
}

/// Executes operator commands from `input` until `quit` or the end of input
pub async fn run_console<R: AsyncBufRead + Unpin>(chord: &Chord, input: R) -> Result<ConsoleExit> {
    let mut lines = input.lines();
    while let Some(line) = lines.next_line().await? {
        let command = match ConsoleCommand::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e);
                continue;
            }
        };
        match command {
            ConsoleCommand::Request(file) => match chord.request(file).await {
                Ok(RouteDecision::Local) => println!("File {} is stored here", file),
                Ok(RouteDecision::Forward(peer)) => {
                    println!("File request for {} has been sent to Peer {}", file, peer)
                }
                Err(e) => println!("{}", e),
            },
            ConsoleCommand::Store(file) => match chord.store(file).await {
                Ok(RouteDecision::Local) => println!("Store {} request accepted", file),
                Ok(RouteDecision::Forward(peer)) => {
                    println!("Store {} request forwarded to Peer {}", file, peer)
                }
                Err(e) => println!("{}", e),
            },
            ConsoleCommand::Status => {
                println!("{}", chord.snapshot());
                println!("Stored files: {:?}", chord.files().stored_files());
            }
            ConsoleCommand::Help => println!("{}", HELP),
            ConsoleCommand::Quit => {
                if let Err(e) = chord.quit().await {
                    warn!("Not every predecessor could be notified: {}", e);
                }
                return Ok(ConsoleExit::Quit);
            }
        }
    }
    Ok(ConsoleExit::InputClosed)
}

fn parse_file(raw: &str) -> Result<FileId> {
    raw.parse()
        .map_err(|_| anyhow!("{:?} is not a file number", raw))
}
