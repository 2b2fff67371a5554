//! Errors raised by the ring protocol.
use std::io;

use crate::key_space::PeerId;

/// A wrap `Result` carrying [`RingError`].
pub type Result<T> = std::result::Result<T, RingError>;

/// Errors surfaced by the ring protocol.
///
/// None of these are fatal to a node: server loops log them and keep going.
/// Out-of-order heartbeat responses are not errors at all, they are discarded silently.
#[derive(Debug, thiserror::Error)]
pub enum RingError {
    /// A frame that could not be decoded into a [`Frame`](crate::chord::peer_messages::Frame)
    #[error("Malformed message: {0}")]
    MalformedMessage(String),
    /// Connecting or sending to another peer failed
    #[error("Peer {peer} is unreachable: {source}")]
    PeerUnreachable {
        peer: PeerId,
        #[source]
        source: io::Error,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl RingError {
    pub(crate) fn malformed(frame: &str, reason: &str) -> Self {
        RingError::MalformedMessage(format!("{} in {:?}", reason, frame))
    }

    pub(crate) fn unreachable(peer: PeerId, source: io::Error) -> Self {
        RingError::PeerUnreachable { peer, source }
    }
}
