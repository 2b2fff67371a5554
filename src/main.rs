use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{info, warn};
use tokio::io::BufReader;

use ring_dht::chord::{Bootstrap, Chord};
use ring_dht::config::Config;
use ring_dht::console::{run_console, ConsoleExit};
use ring_dht::key_space::PeerId;

#[derive(Parser, Debug)]
#[command(name = "ring_dht", about = "A peer of a two-successor Chord ring")]
struct Cli {
    /// INI file overriding the default ports, timeouts and file directory
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Start as a member of an existing ring with known successors
    Init {
        id: PeerId,
        first_successor: PeerId,
        second_successor: PeerId,
        /// Seconds between heartbeat rounds
        ping_interval: u64,
    },
    /// Join the ring through a peer that is already part of it
    Join {
        id: PeerId,
        known_peer: PeerId,
        /// Seconds between heartbeat rounds
        ping_interval: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::from_ini_file(path)?,
        None => Config::default(),
    };
    let (id, bootstrap, ping_interval) = match cli.mode {
        Mode::Init {
            id,
            first_successor,
            second_successor,
            ping_interval,
        } => (
            id,
            Bootstrap::Init {
                first: first_successor,
                second: second_successor,
            },
            ping_interval,
        ),
        Mode::Join {
            id,
            known_peer,
            ping_interval,
        } => (id, Bootstrap::Join { contact: known_peer }, ping_interval),
    };
    config.ping_interval = Duration::from_secs(ping_interval.max(1));

    let chord = Chord::start(id, bootstrap, config)
        .await
        .with_context(|| format!("Failed to start Peer {}", id))?;
    let input = BufReader::new(tokio::io::stdin());
    if run_console(&chord, input).await? == ConsoleExit::InputClosed {
        info!("Input closed, serving until interrupted");
        tokio::signal::ctrl_c().await?;
        info!("Interrupted, leaving the ring");
        if let Err(e) = chord.quit().await {
            warn!("Not every predecessor could be notified: {}", e);
        }
    }
    chord.await_termination().await;
    Ok(())
}
