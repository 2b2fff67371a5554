//! The per-node view of the ring.
//!
//! [`RingState`] is only ever touched behind the single lock held by
//! [`Chord`](crate::chord::Chord). Handlers in the sibling modules mutate it and return the
//! messages that must go out as a list of [`Outbound`] effects, which the node sends after the
//! lock has been released.
use crate::chord::peer_messages::{Frame, PeerMessage, Slot};
use crate::key_space::PeerId;

/// Two ring neighbours in order of distance, either of which may still be unknown
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct PeerPair {
    first: Option<PeerId>,
    second: Option<PeerId>,
}

impl PeerPair {
    pub fn new(first: PeerId, second: PeerId) -> Self {
        PeerPair {
            first: Some(first),
            second: Some(second),
        }
    }

    pub fn first(&self) -> Option<PeerId> {
        self.first
    }

    pub fn second(&self) -> Option<PeerId> {
        self.second
    }

    pub fn get(&self, slot: Slot) -> Option<PeerId> {
        match slot {
            Slot::First => self.first,
            Slot::Second => self.second,
        }
    }

    pub fn set(&mut self, slot: Slot, peer: PeerId) {
        match slot {
            Slot::First => self.first = Some(peer),
            Slot::Second => self.second = Some(peer),
        }
    }

    /// Both entries, if both are known
    pub fn both(&self) -> Option<(PeerId, PeerId)> {
        Some((self.first?, self.second?))
    }

    /// Finds the slot holding `peer`, preferring the first one
    pub fn slot_of(&self, peer: PeerId) -> Option<Slot> {
        if self.first == Some(peer) {
            Some(Slot::First)
        } else if self.second == Some(peer) {
            Some(Slot::Second)
        } else {
            None
        }
    }
}

/// Highest heartbeat sequence number acknowledged by each successor
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct HeartbeatCounters {
    pub first: u64,
    pub second: u64,
}

impl HeartbeatCounters {
    pub fn get(&self, slot: Slot) -> u64 {
        match slot {
            Slot::First => self.first,
            Slot::Second => self.second,
        }
    }

    pub fn set(&mut self, slot: Slot, value: u64) {
        match slot {
            Slot::First => self.first = value,
            Slot::Second => self.second = value,
        }
    }
}

/// Where a node stands in the membership protocol
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum MembershipPhase {
    Uninitialized,
    /// A join request is on its way around the ring
    Joining,
    InRing,
    /// The node has left; nothing is sent any more
    Departed,
}

/// A message that has to be sent once the state lock is released
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: PeerId,
    pub frame: Frame,
}

impl Outbound {
    pub fn new(to: PeerId, origin: PeerId, message: PeerMessage) -> Self {
        Outbound {
            to,
            frame: Frame::new(origin, message),
        }
    }
}

/// Mutable ring membership of one node
#[derive(Debug, Clone)]
pub struct RingState {
    id: PeerId,
    pub(crate) phase: MembershipPhase,
    pub(crate) successors: PeerPair,
    /// Last peer seen pinging each slot; a best-effort cache, never queried actively
    pub(crate) predecessors: PeerPair,
    pub(crate) responses: HeartbeatCounters,
    /// Sequence number of the next heartbeat round
    pub(crate) next_sequence: u64,
    /// Counter gap at which a successor is declared lost
    pub(crate) max_timeout: u64,
}

impl RingState {
    /// A node whose position in the ring is already known
    pub fn seeded(id: PeerId, first: PeerId, second: PeerId, max_timeout: u64) -> Self {
        RingState {
            phase: MembershipPhase::InRing,
            successors: PeerPair::new(first, second),
            ..RingState::uninitialized(id, max_timeout)
        }
    }

    /// A node that still has to perform the join handshake
    pub fn uninitialized(id: PeerId, max_timeout: u64) -> Self {
        RingState {
            id,
            phase: MembershipPhase::Uninitialized,
            successors: PeerPair::default(),
            predecessors: PeerPair::default(),
            responses: HeartbeatCounters::default(),
            next_sequence: 1,
            max_timeout,
        }
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn phase(&self) -> MembershipPhase {
        self.phase
    }

    pub fn successors(&self) -> PeerPair {
        self.successors
    }

    pub fn predecessors(&self) -> PeerPair {
        self.predecessors
    }

    pub fn responses(&self) -> HeartbeatCounters {
        self.responses
    }

    pub(crate) fn outbound(&self, to: PeerId, message: PeerMessage) -> Outbound {
        Outbound::new(to, self.id, message)
    }

    pub fn snapshot(&self) -> RingSnapshot {
        RingSnapshot {
            id: self.id,
            phase: self.phase,
            successors: self.successors,
            predecessors: self.predecessors,
            responses: self.responses,
        }
    }
}

/// Copy of a node's view, taken under the lock
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RingSnapshot {
    pub id: PeerId,
    pub phase: MembershipPhase,
    pub successors: PeerPair,
    pub predecessors: PeerPair,
    pub responses: HeartbeatCounters,
}

impl std::fmt::Display for RingSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let show = |peer: Option<PeerId>| peer.map_or_else(|| "-".to_string(), |p| p.to_string());
        write!(
            f,
            "Peer {} ({:?}): successors [{}, {}], predecessors [{}, {}], responses [{}, {}]",
            self.id,
            self.phase,
            show(self.successors.first()),
            show(self.successors.second()),
            show(self.predecessors.first()),
            show(self.predecessors.second()),
            self.responses.first,
            self.responses.second,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pair_accessors_follow_slots() {
        let mut pair = PeerPair::default();
        assert_eq!(pair.both(), None);
        pair.set(Slot::Second, 9);
        assert_eq!(pair.get(Slot::Second), Some(9));
        assert_eq!(pair.first(), None);
        pair.set(Slot::First, 4);
        assert_eq!(pair.both(), Some((4, 9)));
        assert_eq!(pair.slot_of(9), Some(Slot::Second));
        assert_eq!(pair.slot_of(5), None);
    }

    #[test]
    fn seeded_state_is_in_ring() {
        let state = RingState::seeded(10, 20, 30, 3);
        assert_eq!(state.phase(), MembershipPhase::InRing);
        assert_eq!(state.successors().both(), Some((20, 30)));
        assert_eq!(state.predecessors(), PeerPair::default());
        assert_eq!(state.next_sequence, 1);
    }

    #[test]
    fn snapshot_renders_unknown_peers() {
        let state = RingState::uninitialized(7, 3);
        assert_eq!(
            state.snapshot().to_string(),
            "Peer 7 (Uninitialized): successors [-, -], predecessors [-, -], responses [0, 0]"
        );
    }
}
