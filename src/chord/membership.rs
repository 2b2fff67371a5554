//! Join, repair and departure transitions of the membership protocol.
//!
//! ```text
//! UNINITIALIZED --join--> JOINING --accepted--> IN_RING --quit--> DEPARTED
//! ```
//! A join request walks the ring one successor at a time until it reaches the node whose arc
//! contains the joiner's ID. That node splices the joiner in directly behind itself.
use log::{debug, info, warn};

use crate::chord::peer_messages::{PeerMessage, Slot};
use crate::chord::ring_state::{MembershipPhase, Outbound, PeerPair, RingState};
use crate::key_space::{is_between_on_ring, PeerId};

impl RingState {
    /// Starts the join handshake through a known peer
    pub(crate) fn begin_join(&mut self, contact: PeerId) -> Vec<Outbound> {
        self.phase = MembershipPhase::Joining;
        info!("Peer {}: joining the ring through Peer {}", self.id(), contact);
        vec![self.outbound(contact, PeerMessage::Join { contact })]
    }

    /// Handles a `join` request from `joiner`
    ///
    /// Inserts the joiner behind us if it falls on our arc, otherwise passes the request on.
    pub(crate) fn handle_join(&mut self, joiner: PeerId, contact: PeerId) -> Vec<Outbound> {
        if self.phase != MembershipPhase::InRing {
            warn!(
                "Peer {}: dropping join from Peer {} while {:?}",
                self.id(),
                joiner,
                self.phase
            );
            return Vec::new();
        }
        if joiner == self.id() {
            warn!("Peer {}: a join request for our own ID came back", self.id());
            return Vec::new();
        }
        let Some((first, second)) = self.successors.both() else {
            warn!("Peer {}: cannot place Peer {} without successors", self.id(), joiner);
            return Vec::new();
        };

        if !is_between_on_ring(joiner, self.id(), first) {
            debug!(
                "Peer {}: join request of Peer {} forwarded to Peer {}",
                self.id(),
                joiner,
                first
            );
            return vec![Outbound::new(first, joiner, PeerMessage::Join { contact })];
        }

        let mut outbound = vec![self.outbound(joiner, PeerMessage::Accepted { first, second })];
        match self.predecessors.first() {
            Some(predecessor) => {
                outbound.push(self.outbound(predecessor, PeerMessage::Inform { second: joiner }))
            }
            None => warn!(
                "Peer {}: no predecessor observed yet, cannot tell it about Peer {}",
                self.id(),
                joiner
            ),
        }
        self.successors = PeerPair::new(joiner, first);
        info!(
            "Peer {}: Peer {} joined, successors are now [{}, {}]",
            self.id(),
            joiner,
            joiner,
            first
        );
        outbound
    }

    /// Adopts the successor pair handed over by the node that admitted us
    pub(crate) fn handle_accepted(&mut self, from: PeerId, first: PeerId, second: PeerId) {
        if self.phase != MembershipPhase::Joining {
            warn!(
                "Peer {}: ignoring accepted from Peer {} while {:?}",
                self.id(),
                from,
                self.phase
            );
            return;
        }
        self.successors = PeerPair::new(first, second);
        self.phase = MembershipPhase::InRing;
        info!(
            "Peer {}: join accepted by Peer {}, successors are [{}, {}]",
            self.id(),
            from,
            first,
            second
        );
    }

    /// Proposes a replacement for `lost`, which the caller had as one of its successors
    pub(crate) fn handle_update(&mut self, caller: PeerId, lost: PeerId) -> Vec<Outbound> {
        let proposal = if self.successors.first() == Some(lost) {
            self.successors.second()
        } else {
            self.successors.first()
        };
        match proposal {
            Some(successor) => {
                debug!(
                    "Peer {}: proposing Peer {} to Peer {} in place of Peer {}",
                    self.id(),
                    successor,
                    caller,
                    lost
                );
                vec![self.outbound(caller, PeerMessage::FindSuccessor { successor })]
            }
            None => {
                warn!("Peer {}: no successor to propose to Peer {}", self.id(), caller);
                Vec::new()
            }
        }
    }

    /// Splices over a lost successor using the proposal of the surviving one
    pub(crate) fn handle_find_successor(&mut self, responder: PeerId, successor: PeerId) {
        if self.successors.first() != Some(responder) {
            // The first successor is the one that was lost
            if let Some(second) = self.successors.second() {
                self.successors.set(Slot::First, second);
            }
        }
        self.successors.set(Slot::Second, successor);
        info!(
            "Peer {}: successors repaired to {:?}",
            self.id(),
            self.successors
        );
    }

    pub(crate) fn handle_inform(&mut self, from: PeerId, second: PeerId) {
        self.successors.set(Slot::Second, second);
        info!(
            "Peer {}: Peer {} set our second successor to Peer {}",
            self.id(),
            from,
            second
        );
    }

    /// Bridges over a successor that leaves gracefully
    pub(crate) fn handle_quit(&mut self, departing: PeerId, first: PeerId, second: PeerId) {
        match self.successors.slot_of(departing) {
            Some(Slot::First) => self.successors = PeerPair::new(first, second),
            Some(Slot::Second) => self.successors.set(Slot::Second, first),
            None => {
                warn!(
                    "Peer {}: Peer {} announced its departure but is not a successor",
                    self.id(),
                    departing
                );
                return;
            }
        }
        info!(
            "Peer {}: Peer {} departed, successors are now {:?}",
            self.id(),
            departing,
            self.successors
        );
    }

    /// Leaves the ring, telling both predecessors whom to connect to instead
    pub(crate) fn depart(&mut self) -> Vec<Outbound> {
        if self.phase == MembershipPhase::Departed {
            return Vec::new();
        }
        let was_in_ring = self.phase == MembershipPhase::InRing;
        self.phase = MembershipPhase::Departed;
        let Some((first, second)) = self.successors.both().filter(|_| was_in_ring) else {
            return Vec::new();
        };

        let mut recipients = Vec::with_capacity(2);
        for predecessor in [self.predecessors.first(), self.predecessors.second()]
            .into_iter()
            .flatten()
        {
            if predecessor != self.id() && !recipients.contains(&predecessor) {
                recipients.push(predecessor);
            }
        }
        info!("Peer {}: departing, notifying {:?}", self.id(), recipients);
        recipients
            .into_iter()
            .map(|predecessor| self.outbound(predecessor, PeerMessage::Quit { first, second }))
            .collect()
    }
}
