//! Hop-by-hop routing of `store` and `request` operations.
use log::debug;

use crate::chord::ring_state::RingState;
use crate::key_space::{key_for_file, owns, FileId, PeerId};

/// What a node does with a file operation that reached it
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// This node owns the file's key and serves the operation itself
    Local,
    /// Pass the unchanged message on to this peer
    Forward(PeerId),
}

impl RingState {
    /// Decides whether `file` is ours or which peer has to look at it next
    ///
    /// A node that has not been placed in the ring yet treats every key as its own.
    pub fn route(&self, file: FileId) -> RouteDecision {
        let key = key_for_file(file);
        let Some(next) = self.successors.first() else {
            return RouteDecision::Local;
        };
        if owns(key, self.id(), next, self.predecessors.first()) {
            debug!("Peer {}: key {} of file {} is ours", self.id(), key, file);
            RouteDecision::Local
        } else {
            RouteDecision::Forward(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::peer_messages::Slot;
    use crate::key_space::SPACE;

    /// Ring 10 -> 20 -> 30 with fully discovered predecessors
    fn ring() -> Vec<RingState> {
        let ids: [PeerId; 3] = [10, 20, 30];
        (0..3)
            .map(|i| {
                let mut state = RingState::seeded(ids[i], ids[(i + 1) % 3], ids[(i + 2) % 3], 3);
                state.handle_ping(ids[(i + 2) % 3], Slot::First, 1);
                state.handle_ping(ids[(i + 1) % 3], Slot::Second, 1);
                state
            })
            .collect()
    }

    /// Follows forwards from `start` and returns the owner and the number of hops
    fn walk(ring: &[RingState], start: usize, file: FileId) -> (PeerId, usize) {
        let mut current = start;
        for hops in 0..=ring.len() {
            match ring[current].route(file) {
                RouteDecision::Local => return (ring[current].id(), hops),
                RouteDecision::Forward(next) => {
                    current = ring.iter().position(|s| s.id() == next).unwrap();
                }
            }
        }
        panic!("file {} was never claimed", file);
    }

    #[test]
    fn store_at_ten_reaches_the_owner_of_fifteen() {
        let ring = ring();
        assert_eq!(ring[0].route(15), RouteDecision::Forward(20));
        assert_eq!(walk(&ring, 0, 15), (20, 1));
        // Same key, different file id
        assert_eq!(walk(&ring, 0, 15 + SPACE as u64), (20, 1));
    }

    #[test]
    fn every_key_terminates_at_the_same_owner_from_every_start() {
        let ring = ring();
        for file in 0..SPACE as u64 {
            let (owner, hops) = walk(&ring, 0, file);
            assert!(hops < ring.len());
            for start in 1..ring.len() {
                assert_eq!(walk(&ring, start, file).0, owner, "file {}", file);
            }
        }
    }

    #[test]
    fn nodes_outside_the_ring_keep_everything() {
        let state = RingState::uninitialized(42, 3);
        assert_eq!(state.route(7), RouteDecision::Local);
    }
}
