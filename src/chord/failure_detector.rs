//! Heartbeat-based detection of lost successors.
//!
//! Every round pings both successors with the same sequence number. Each successor's highest
//! acknowledged sequence number is tracked separately; once one of them runs `max_timeout` or more
//! rounds behind the other, the lagging successor is considered gone and the surviving one is
//! asked for a replacement.
use log::{debug, info, trace};

use crate::chord::peer_messages::{PeerMessage, Slot};
use crate::chord::ring_state::{MembershipPhase, Outbound, RingState};
use crate::key_space::PeerId;

impl RingState {
    /// Produces the pings of the next heartbeat round
    pub(crate) fn heartbeat_round(&mut self) -> Vec<Outbound> {
        if self.phase != MembershipPhase::InRing {
            return Vec::new();
        }
        let Some((first, second)) = self.successors.both() else {
            return Vec::new();
        };
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        trace!(
            "Peer {}: heartbeat {} to Peers {} and {}",
            self.id(),
            sequence,
            first,
            second
        );
        vec![
            self.outbound(first, PeerMessage::Ping { slot: Slot::First, sequence }),
            self.outbound(second, PeerMessage::Ping { slot: Slot::Second, sequence }),
        ]
    }

    /// Records the pinging peer as our predecessor in `slot` and acknowledges the ping
    pub(crate) fn handle_ping(&mut self, from: PeerId, slot: Slot, sequence: u64) -> Vec<Outbound> {
        if self.phase == MembershipPhase::Departed {
            return Vec::new();
        }
        match self.predecessors.get(slot) {
            Some(previous) if previous == from => {}
            previous => {
                info!(
                    "Peer {}: {:?} predecessor is now Peer {} (was {:?})",
                    self.id(),
                    slot,
                    from,
                    previous
                );
                self.predecessors.set(slot, from);
            }
        }
        vec![self.outbound(from, PeerMessage::Response { sequence })]
    }

    /// Tracks an acknowledgement and, if it opens a large enough gap, declares a successor lost
    ///
    /// Responses that do not advance the counter of their successor are discarded.
    pub(crate) fn handle_response(&mut self, from: PeerId, sequence: u64) -> Vec<Outbound> {
        let slot = if self.successors.first() == Some(from) && sequence > self.responses.first {
            Slot::First
        } else if self.successors.second() == Some(from) && sequence > self.responses.second {
            Slot::Second
        } else {
            trace!(
                "Peer {}: discarding stale response {} from Peer {}",
                self.id(),
                sequence,
                from
            );
            return Vec::new();
        };
        self.responses.set(slot, sequence);

        let lagging = slot.other();
        let behind = self.responses.get(lagging);
        if sequence.saturating_sub(behind) < self.max_timeout || behind == 0 {
            return Vec::new();
        }
        // Equalize so the same gap does not raise the alarm again
        self.responses.set(lagging, sequence);

        let (Some(lost), Some(survivor)) = (self.successors.get(lagging), self.successors.get(slot))
        else {
            return Vec::new();
        };
        info!(
            "Peer {}: Peer {} is no longer alive, asking Peer {} for a replacement",
            self.id(),
            lost,
            survivor
        );
        debug!("Peer {}: response counters {:?}", self.id(), self.responses);
        vec![self.outbound(survivor, PeerMessage::Update { lost })]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chord::ring_state::{HeartbeatCounters, PeerPair};

    #[test]
    fn rounds_ping_both_successors_with_a_shared_sequence() {
        let mut state = RingState::seeded(10, 20, 30, 3);
        assert_eq!(
            state.heartbeat_round(),
            vec![
                Outbound::new(20, 10, PeerMessage::Ping { slot: Slot::First, sequence: 1 }),
                Outbound::new(30, 10, PeerMessage::Ping { slot: Slot::Second, sequence: 1 }),
            ]
        );
        let second_round = state.heartbeat_round();
        assert!(second_round
            .iter()
            .all(|o| matches!(o.frame.message, PeerMessage::Ping { sequence: 2, .. })));
    }

    #[test]
    fn no_heartbeats_before_joining_or_after_leaving() {
        let mut joining = RingState::uninitialized(10, 3);
        assert!(joining.heartbeat_round().is_empty());

        let mut gone = RingState::seeded(10, 20, 30, 3);
        gone.depart();
        assert!(gone.heartbeat_round().is_empty());
    }

    #[test]
    fn pings_record_predecessors_and_are_answered() {
        let mut state = RingState::seeded(20, 30, 10, 3);
        let outbound = state.handle_ping(10, Slot::First, 4);
        assert_eq!(
            outbound,
            vec![Outbound::new(10, 20, PeerMessage::Response { sequence: 4 })]
        );
        state.handle_ping(5, Slot::Second, 4);
        assert_eq!(state.predecessors(), PeerPair::new(10, 5));
    }

    #[test]
    fn predecessor_slot_follows_the_latest_pinger() {
        let mut state = RingState::seeded(20, 30, 10, 3);
        state.handle_ping(10, Slot::First, 1);
        // Peer 15 joined between 10 and 20 and now pings the first slot
        state.handle_ping(15, Slot::First, 1);
        assert_eq!(state.predecessors().first(), Some(15));
    }

    #[test]
    fn stale_responses_do_not_change_counters() {
        let mut state = RingState::seeded(10, 20, 30, 3);
        state.responses = HeartbeatCounters { first: 5, second: 4 };
        assert!(state.handle_response(20, 5).is_empty());
        assert!(state.handle_response(20, 2).is_empty());
        assert!(state.handle_response(30, 4).is_empty());
        assert!(state.handle_response(99, 50).is_empty());
        assert_eq!(state.responses(), HeartbeatCounters { first: 5, second: 4 });
    }

    #[test]
    fn lagging_second_successor_is_declared_lost_once() {
        let mut state = RingState::seeded(10, 20, 30, 3);
        state.responses = HeartbeatCounters { first: 4, second: 1 };

        let outbound = state.handle_response(20, 5);
        assert_eq!(
            outbound,
            vec![Outbound::new(20, 10, PeerMessage::Update { lost: 30 })]
        );
        assert_eq!(state.responses(), HeartbeatCounters { first: 5, second: 5 });

        // The same counter state arriving again is stale
        assert!(state.handle_response(20, 5).is_empty());
        // The next round is within the gap again
        assert!(state.handle_response(20, 6).is_empty());
    }

    #[test]
    fn lagging_first_successor_is_reported_to_the_second() {
        let mut state = RingState::seeded(10, 20, 30, 3);
        state.responses = HeartbeatCounters { first: 2, second: 4 };
        assert_eq!(
            state.handle_response(30, 5),
            vec![Outbound::new(30, 10, PeerMessage::Update { lost: 20 })]
        );
    }

    #[test]
    fn silent_successor_is_not_accused_before_answering_once() {
        let mut state = RingState::seeded(10, 20, 30, 3);
        for sequence in 1..10 {
            assert!(state.handle_response(20, sequence).is_empty());
        }
        assert_eq!(state.responses(), HeartbeatCounters { first: 9, second: 0 });
    }

    #[test]
    fn gap_below_threshold_is_tolerated() {
        let mut state = RingState::seeded(10, 20, 30, 3);
        state.responses = HeartbeatCounters { first: 3, second: 2 };
        assert!(state.handle_response(20, 4).is_empty());
        assert_eq!(state.responses(), HeartbeatCounters { first: 4, second: 2 });
    }
}
