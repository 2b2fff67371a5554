//! Node configuration.
//!
//! All values default to the layout of the original deployment: every peer runs on localhost and
//! derives its ports from its ID. An INI file may override any of them:
//! ```ini
//! [ring]
//! host = 127.0.0.1        ; Address every peer listens on
//! base_port = 12000       ; Control port = base_port + peer id (UDP heartbeats use the same number)
//! file_port_offset = 1000 ; File transfer port = base_port + peer id + file_port_offset
//! max_timeout = 3         ; Heartbeat counter gap after which a successor is declared lost
//! read_timeout_ms = 2000  ; Bound on reading one inbound frame and on connecting to a peer
//! file_directory = .      ; Where files are served from and received into
//! ```
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context};
use ini::ini;

use crate::error::{Result, RingError};
use crate::key_space::{PeerId, MAX_PEER};

pub const DEFAULT_BASE_PORT: u16 = 12000;
pub const DEFAULT_FILE_PORT_OFFSET: u16 = 1000;
pub const DEFAULT_MAX_TIMEOUT: u64 = 3;
/// Largest frame accepted on either transport
pub const MAX_FRAME_LEN: usize = 1024;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub base_port: u16,
    pub file_port_offset: u16,
    /// Time between two heartbeat rounds
    pub ping_interval: Duration,
    /// Counter gap at which the lagging successor is declared lost
    pub max_timeout: u64,
    /// Bound on reading one inbound control-plane frame and on connecting to a peer
    pub read_timeout: Duration,
    pub file_directory: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            base_port: DEFAULT_BASE_PORT,
            file_port_offset: DEFAULT_FILE_PORT_OFFSET,
            ping_interval: Duration::from_secs(5),
            max_timeout: DEFAULT_MAX_TIMEOUT,
            read_timeout: Duration::from_secs(2),
            file_directory: PathBuf::from("."),
        }
    }
}

impl Config {
    /// Reads overrides from the `[ring]` section of an INI file on top of the defaults
    pub fn from_ini_file(path: &Path) -> anyhow::Result<Self> {
        let file = path.to_string_lossy().to_string();
        let map = ini!(safe file.as_str())
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path.display(), e))?;
        let mut config = Config::default();
        let Some(section) = map.get("ring") else {
            return Ok(config);
        };

        if let Some(host) = value(section, "host") {
            config.host = host.parse().context("Invalid host")?;
        }
        if let Some(port) = value(section, "base_port") {
            config.base_port = port.parse().context("Invalid base_port")?;
        }
        if let Some(offset) = value(section, "file_port_offset") {
            config.file_port_offset = offset.parse().context("Invalid file_port_offset")?;
        }
        if let Some(max_timeout) = value(section, "max_timeout") {
            config.max_timeout = max_timeout.parse().context("Invalid max_timeout")?;
        }
        if let Some(timeout) = value(section, "read_timeout_ms") {
            config.read_timeout =
                Duration::from_millis(timeout.parse().context("Invalid read_timeout_ms")?);
        }
        if let Some(directory) = value(section, "file_directory") {
            config.file_directory = PathBuf::from(directory);
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks that every peer in the key space gets a representable port
    pub fn validate(&self) -> Result<()> {
        let highest = self.base_port as u32 + MAX_PEER as u32 + self.file_port_offset as u32;
        if highest > u16::MAX as u32 {
            return Err(RingError::InvalidConfig(format!(
                "base_port {} with file_port_offset {} overflows the port range",
                self.base_port, self.file_port_offset
            )));
        }
        if self.file_port_offset <= MAX_PEER as u16 {
            return Err(RingError::InvalidConfig(format!(
                "file_port_offset {} overlaps the control ports",
                self.file_port_offset
            )));
        }
        if self.max_timeout == 0 {
            return Err(RingError::InvalidConfig("max_timeout must be positive".into()));
        }
        Ok(())
    }

    /// Control-plane (TCP) and heartbeat (UDP) address of a peer
    pub fn peer_address(&self, peer: PeerId) -> SocketAddr {
        SocketAddr::new(self.host, self.base_port + peer as u16)
    }

    /// Address where a peer receives file transfers
    pub fn file_address(&self, peer: PeerId) -> SocketAddr {
        SocketAddr::new(
            self.host,
            self.base_port + peer as u16 + self.file_port_offset,
        )
    }
}

fn value<'a>(section: &'a HashMap<String, Option<String>>, key: &str) -> Option<&'a str> {
    section.get(key).and_then(|v| v.as_deref()).map(str::trim)
}
