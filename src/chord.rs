//! A running ring member
//!
//! We keep the protocol itself free of I/O: the submodules implement every transition on
//! [`RingState`] and return the messages it produces. This module owns the sockets and the
//! periodic tasks, feeds incoming frames into the state machine and sends whatever comes out.
//!
//! # Tasks:
//! Every node runs four long-lived tasks sharing one [`RingState`]:
//! - Control-plane server: accepts one TCP connection per frame and handles them one at a time
//! - Heartbeat server: receives `ping`/`response` datagrams on the same port number over UDP
//! - Heartbeat ticker: sends a `ping` round to both successors every `ping_interval`
//! - File transfer server: receives files on `base_port + id + file_port_offset`
//!
//! The ring state sits behind a single mutex. Each handler takes the lock once, decides and
//! mutates inside that scope, and releases it before anything is sent, so no lock is ever held
//! across network I/O.
//!
//! # Shutdown:
//! All loops select on a shared [`CancellationToken`]. [`Chord::quit`] notifies the predecessors
//! first, [`Chord::initiate_shutdown`] just stops (which is how a crash looks to the other peers).
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, trace, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinHandle;
use tokio::time::{timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::chord::peer_messages::{Frame, PeerMessage};
use crate::chord::ring_state::{Outbound, RingSnapshot, RingState};
use crate::chord::routing::RouteDecision;
use crate::config::{Config, MAX_FRAME_LEN};
use crate::error::{Result, RingError};
use crate::file_transfer::FileTransfer;
use crate::key_space::{FileId, PeerId};

pub mod failure_detector;
pub mod membership;
pub mod peer_messages;
pub mod ring_state;
pub mod routing;

/// How a node finds its place in the ring at startup
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Bootstrap {
    /// The node's successors are known in advance
    Init { first: PeerId, second: PeerId },
    /// The node has to join through a peer that is already part of the ring
    Join { contact: PeerId },
}

/// Handle to a running node. Cloning it is cheap, all clones share the same node.
#[derive(Clone)]
pub struct Chord {
    state: Arc<ChordState>,
}

struct ChordState {
    id: PeerId,
    config: Config,
    /// The whole membership view, guarded as one unit
    ring: Mutex<RingState>,
    files: FileTransfer,
    /// Bound to our heartbeat port, used both for receiving and sending datagrams
    heartbeat_socket: UdpSocket,
    cancellation_token: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Chord {
    /// Binds all sockets, starts the node's tasks and, when joining, sends the join request
    ///
    /// # Arguments
    ///
    /// * `id` - our position on the ring
    /// * `bootstrap` - either the known successors, or the peer to join through
    /// * `config` - addressing and timing parameters shared by the whole ring
    pub async fn start(id: PeerId, bootstrap: Bootstrap, config: Config) -> Result<Chord> {
        config.validate()?;
        let address = config.peer_address(id);
        info!("Starting Peer {} on {}", id, address);

        let control_listener = TcpListener::bind(address).await?;
        let heartbeat_socket = UdpSocket::bind(address).await?;
        let file_listener = TcpListener::bind(config.file_address(id)).await?;

        let ring = match bootstrap {
            Bootstrap::Init { first, second } => {
                RingState::seeded(id, first, second, config.max_timeout)
            }
            Bootstrap::Join { .. } => RingState::uninitialized(id, config.max_timeout),
        };

        let chord = Chord {
            state: Arc::new(ChordState {
                id,
                files: FileTransfer::new(config.file_directory.clone()),
                config,
                ring: Mutex::new(ring),
                heartbeat_socket,
                cancellation_token: CancellationToken::new(),
                tasks: Mutex::new(Vec::new()),
            }),
        };

        let tasks = vec![
            tokio::spawn(chord.clone().run_control_server(control_listener)),
            tokio::spawn(chord.clone().run_heartbeat_server()),
            tokio::spawn(chord.clone().run_heartbeat_ticker()),
            tokio::spawn({
                let files = chord.state.files.clone();
                let token = chord.state.cancellation_token.clone();
                async move { files.serve(file_listener, token).await }
            }),
        ];
        chord.state.tasks.lock().extend(tasks);

        if let Bootstrap::Join { contact } = bootstrap {
            let outbound = chord.state.ring.lock().begin_join(contact);
            if let Err(e) = chord.dispatch(outbound).await {
                chord.initiate_shutdown();
                return Err(e);
            }
        }
        Ok(chord)
    }

    pub fn id(&self) -> PeerId {
        self.state.id
    }

    pub fn config(&self) -> &Config {
        &self.state.config
    }

    pub fn files(&self) -> &FileTransfer {
        &self.state.files
    }

    pub fn snapshot(&self) -> RingSnapshot {
        self.state.ring.lock().snapshot()
    }

    pub fn is_alive(&self) -> bool {
        !self.state.cancellation_token.is_cancelled()
    }

    /// Routes a store operation issued on this node
    pub async fn store(&self, file: FileId) -> Result<RouteDecision> {
        self.route_store(self.id(), file).await
    }

    /// Routes a file request issued on this node
    pub async fn request(&self, file: FileId) -> Result<RouteDecision> {
        self.route_request(self.id(), file).await
    }

    /// Leaves the ring gracefully and stops all tasks
    pub async fn quit(&self) -> Result<()> {
        let outbound = self.state.ring.lock().depart();
        let result = self.dispatch(outbound).await;
        self.initiate_shutdown();
        result
    }

    /// Stops all tasks without telling anybody
    pub fn initiate_shutdown(&self) {
        self.state.cancellation_token.cancel();
    }

    /// Waits until every task of this node has finished
    pub async fn await_termination(&self) {
        let tasks = std::mem::take(&mut *self.state.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!("Peer {}: task ended abnormally: {}", self.id(), e);
            }
        }
        info!("Peer {} terminated", self.id());
    }

    async fn run_control_server(self, listener: TcpListener) {
        info!(
            "Peer {} listening for peers on {}",
            self.id(),
            self.state.config.peer_address(self.id())
        );
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            // Handled inline: one control message at a time
                            if let Err(e) = self.accept_peer_connection(stream).await {
                                warn!("Peer {}: error in connection: {}", self.id(), e);
                            }
                        }
                        Err(e) => warn!("Peer {}: failed to accept connection: {}", self.id(), e),
                    }
                }
                _ = self.state.cancellation_token.cancelled() => {
                    info!("Peer {}: stopped accepting peer connections", self.id());
                    break;
                }
            }
        }
    }

    async fn accept_peer_connection(&self, stream: TcpStream) -> Result<()> {
        let mut buf = Vec::with_capacity(64);
        let mut reader = stream.take(MAX_FRAME_LEN as u64);
        timeout(self.state.config.read_timeout, reader.read_to_end(&mut buf))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "peer did not finish its frame"))??;
        let frame = Frame::decode_bytes(&buf)?;
        trace!("Peer {}: received {}", self.id(), frame);
        if frame.message.is_heartbeat() {
            return Err(RingError::malformed(
                &frame.encode(),
                "heartbeat sent over the control plane",
            ));
        }
        self.handle_frame(frame).await
    }

    async fn run_heartbeat_server(self) {
        let mut buf = [0u8; MAX_FRAME_LEN];
        loop {
            tokio::select! {
                result = self.state.heartbeat_socket.recv_from(&mut buf) => {
                    let n = match result {
                        Ok((n, _)) => n,
                        Err(e) => {
                            debug!("Peer {}: heartbeat receive failed: {}", self.id(), e);
                            continue;
                        }
                    };
                    match Frame::decode_bytes(&buf[..n]) {
                        Ok(frame) if !frame.message.is_heartbeat() => {
                            warn!("Peer {}: dropping {} sent as a datagram", self.id(), frame);
                        }
                        Ok(frame) => {
                            if let Err(e) = self.handle_frame(frame).await {
                                warn!("Peer {}: failed to handle {}: {}", self.id(), frame, e);
                            }
                        }
                        Err(e) => warn!("Peer {}: dropping datagram: {}", self.id(), e),
                    }
                }
                _ = self.state.cancellation_token.cancelled() => {
                    debug!("Peer {}: heartbeat server stopped", self.id());
                    break;
                }
            }
        }
    }

    async fn run_heartbeat_ticker(self) {
        let mut interval = tokio::time::interval(self.state.config.ping_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let outbound = self.state.ring.lock().heartbeat_round();
                    if let [first, second] = outbound.as_slice() {
                        debug!(
                            "Peer {}: ping requests sent to Peers {} and {}",
                            self.id(),
                            first.to,
                            second.to
                        );
                    }
                    // Unreachable successors show up as missing responses
                    let _ = self.dispatch(outbound).await;
                }
                _ = self.state.cancellation_token.cancelled() => {
                    debug!("Peer {}: heartbeat ticker stopped", self.id());
                    break;
                }
            }
        }
    }

    /// Feeds one decoded frame into the protocol, whichever transport it came from
    async fn handle_frame(&self, frame: Frame) -> Result<()> {
        let Frame { origin, message } = frame;
        let outbound = {
            let mut ring = self.state.ring.lock();
            match message {
                PeerMessage::Join { contact } => ring.handle_join(origin, contact),
                PeerMessage::Accepted { first, second } => {
                    ring.handle_accepted(origin, first, second);
                    Vec::new()
                }
                PeerMessage::Update { lost } => ring.handle_update(origin, lost),
                PeerMessage::Inform { second } => {
                    ring.handle_inform(origin, second);
                    Vec::new()
                }
                PeerMessage::FindSuccessor { successor } => {
                    ring.handle_find_successor(origin, successor);
                    Vec::new()
                }
                PeerMessage::Quit { first, second } => {
                    ring.handle_quit(origin, first, second);
                    Vec::new()
                }
                PeerMessage::Ping { slot, sequence } => ring.handle_ping(origin, slot, sequence),
                PeerMessage::Response { sequence } => ring.handle_response(origin, sequence),
                PeerMessage::Store { .. }
                | PeerMessage::Request { .. }
                | PeerMessage::Found { .. } => Vec::new(),
            }
        };

        match message {
            PeerMessage::Store { file } => self.route_store(origin, file).await.map(|_| ()),
            PeerMessage::Request { file } => self.route_request(origin, file).await.map(|_| ()),
            PeerMessage::Found { file } => {
                info!(
                    "Peer {}: Peer {} has File {}, receiving it on port {}",
                    self.id(),
                    origin,
                    file,
                    self.state.config.file_address(self.id()).port()
                );
                Ok(())
            }
            _ => self.dispatch(outbound).await,
        }
    }

    async fn route_store(&self, origin: PeerId, file: FileId) -> Result<RouteDecision> {
        let decision = self.state.ring.lock().route(file);
        match decision {
            RouteDecision::Local => self.state.files.accept_store(file, origin),
            RouteDecision::Forward(next) => {
                debug!("Peer {}: store of File {} forwarded to Peer {}", self.id(), file, next);
                self.send(Outbound::new(next, origin, PeerMessage::Store { file }))
                    .await?;
            }
        }
        Ok(decision)
    }

    async fn route_request(&self, origin: PeerId, file: FileId) -> Result<RouteDecision> {
        let decision = self.state.ring.lock().route(file);
        match decision {
            RouteDecision::Local if origin == self.id() => {
                info!("Peer {}: File {} is stored here", self.id(), file);
            }
            RouteDecision::Local => self.deliver(origin, file).await?,
            RouteDecision::Forward(next) => {
                debug!(
                    "Peer {}: request for File {} forwarded to Peer {}",
                    self.id(),
                    file,
                    next
                );
                self.send(Outbound::new(next, origin, PeerMessage::Request { file }))
                    .await?;
            }
        }
        Ok(decision)
    }

    /// Announces a file to the requesting peer and streams it in the background
    async fn deliver(&self, to: PeerId, file: FileId) -> Result<()> {
        let files = self.state.files.clone();
        if tokio::fs::metadata(files.source_path(file)).await.is_err() {
            warn!(
                "Peer {}: File {} is ours but there is no local copy to send to Peer {}",
                self.id(),
                file,
                to
            );
            return Ok(());
        }
        info!("Peer {}: sending File {} to Peer {}", self.id(), file, to);
        self.send(Outbound::new(to, self.id(), PeerMessage::Found { file }))
            .await?;

        let destination = self.state.config.file_address(to);
        tokio::spawn(async move {
            if let Err(e) = files.send_file(file, destination).await {
                warn!("Transfer of File {} failed: {:#}", file, e);
            }
        });
        Ok(())
    }

    /// Sends every message, returning the first failure after trying all of them
    async fn dispatch(&self, outbound: Vec<Outbound>) -> Result<()> {
        let mut result = Ok(());
        for message in outbound {
            if let Err(e) = self.send(message).await {
                warn!("Peer {}: {}", self.id(), e);
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }

    async fn send(&self, outbound: Outbound) -> Result<()> {
        let Outbound { to, frame } = outbound;
        let address = self.state.config.peer_address(to);
        let encoded = frame.encode();
        trace!("Peer {}: sending {} to Peer {}", self.id(), encoded, to);

        if frame.message.is_heartbeat() {
            return self
                .state
                .heartbeat_socket
                .send_to(encoded.as_bytes(), address)
                .await
                .map(|_| ())
                .map_err(|e| RingError::unreachable(to, e));
        }

        let mut stream = connect_with_timeout(to, address, self.state.config.read_timeout).await?;
        stream
            .write_all(encoded.as_bytes())
            .await
            .map_err(|e| RingError::unreachable(to, e))?;
        stream
            .shutdown()
            .await
            .map_err(|e| RingError::unreachable(to, e))
    }
}

/// Opens a control-plane connection, giving up after `limit`
async fn connect_with_timeout(
    peer: PeerId,
    address: SocketAddr,
    limit: Duration,
) -> Result<TcpStream> {
    match timeout(limit, TcpStream::connect(address)).await {
        Ok(connected) => connected.map_err(|e| RingError::unreachable(peer, e)),
        Err(_) => Err(RingError::unreachable(
            peer,
            io::Error::new(io::ErrorKind::TimedOut, "connection attempt timed out"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    #[tokio::test]
    async fn connecting_to_a_silent_address_is_bounded() {
        // Non-routable: either times out or fails right away, never hangs
        let address: SocketAddr = "10.255.255.1:12020".parse().unwrap();
        let started = Instant::now();
        let result = connect_with_timeout(20, address, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(RingError::PeerUnreachable { peer: 20, .. })));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn connecting_to_a_closed_port_reports_the_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        drop(listener);
        let result = connect_with_timeout(30, address, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(RingError::PeerUnreachable { peer: 30, .. })));
    }
}
