//! The circular identifier space shared by peers and file keys.
//!
//! Peer IDs and file keys both live in `[0, MAX_PEER]`.
//! All arithmetic is circular, so the distance between two points is the shorter of the two arcs
//! connecting them. Ownership of a key is decided hop by hop with [`owns`].

/// Identifies a peer on the ring, and doubles as the coordinate of its key range
pub type PeerId = u8;

/// Identifies a file. Files are mapped onto the ring with [`key_for_file`].
pub type FileId = u64;

/// Highest peer ID allowed in the network
pub const MAX_PEER: PeerId = u8::MAX;

/// Number of points on the ring
pub const SPACE: u16 = MAX_PEER as u16 + 1;

/// Maps a file identifier onto the ring
pub fn key_for_file(file: FileId) -> PeerId {
    (file % SPACE as u64) as PeerId
}

/// Shorter arc length between two points of the ring.
///
/// The result is always within `[0, SPACE / 2]`.
pub fn ring_distance(a: PeerId, b: PeerId) -> u16 {
    let direct = (a as i16 - b as i16).unsigned_abs();
    direct.min(SPACE - direct)
}

/// Per-hop ownership test.
///
/// `candidate` owns `key` if it is the key itself, or if it is strictly closer to the key than
/// `next` and no farther than `prev`. The asymmetric comparison hands exact midpoints to exactly
/// one of the two neighbours.
///
/// An unknown predecessor does not constrain the test, so a node may briefly claim keys of its
/// predecessor until the first heartbeat from it arrives. A candidate whose successor is itself is
/// alone on the ring and owns everything. In a two-node ring (`next == prev`) an exact tie goes to
/// the lower ID, since both comparisons would otherwise reject both nodes.
///
/// # Arguments
///
/// * `key` - the key being routed
/// * `candidate` - the node evaluating ownership
/// * `next` - the candidate's first successor
/// * `prev` - the candidate's first predecessor, if one has been observed
pub fn owns(key: PeerId, candidate: PeerId, next: PeerId, prev: Option<PeerId>) -> bool {
    if candidate == key || candidate == next {
        return true;
    }
    let own = ring_distance(key, candidate);
    let to_next = ring_distance(key, next);
    if prev == Some(next) && own == to_next {
        return candidate < next;
    }
    own < to_next && prev.map_or(true, |prev| own <= ring_distance(key, prev))
}

/// Checks whether `value` lies strictly between `lower` and `upper` walking clockwise.
///
/// If `lower == upper` the open interval spans the whole ring except that point.
pub fn is_between_on_ring(value: PeerId, lower: PeerId, upper: PeerId) -> bool {
    match lower.cmp(&upper) {
        std::cmp::Ordering::Equal => value != lower,
        std::cmp::Ordering::Less => lower < value && value < upper,
        std::cmp::Ordering::Greater => value > lower || value < upper, // Wrap-around
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Walks a sorted ring and returns every node that claims `key`
    fn owners_of(key: PeerId, ring: &[PeerId]) -> Vec<PeerId> {
        let n = ring.len();
        (0..n)
            .filter(|&i| owns(key, ring[i], ring[(i + 1) % n], Some(ring[(i + n - 1) % n])))
            .map(|i| ring[i])
            .collect()
    }

    #[test]
    fn distance_is_a_metric_on_the_circle() {
        for a in 0..=MAX_PEER {
            assert_eq!(ring_distance(a, a), 0);
            for b in (0..=MAX_PEER).step_by(7) {
                assert_eq!(ring_distance(a, b), ring_distance(b, a));
                assert!(ring_distance(a, b) <= SPACE / 2);
            }
        }
        assert_eq!(ring_distance(0, 255), 1);
        assert_eq!(ring_distance(0, 128), 128);
        assert_eq!(ring_distance(250, 5), 11);
    }

    #[test]
    fn file_keys_wrap_around() {
        assert_eq!(key_for_file(15), 15);
        assert_eq!(key_for_file(256), 0);
        assert_eq!(key_for_file(4101), 5);
    }

    #[test]
    fn exactly_one_owner_per_key() {
        let rings: [&[PeerId]; 5] = [
            &[10, 20, 30],
            &[0, 64, 128, 192],
            &[1, 2, 3, 200, 254],
            &[5, 100, 101, 180, 181, 182, 250],
            &[0, 128],
        ];
        for ring in rings {
            for key in 0..=MAX_PEER {
                let owners = owners_of(key, ring);
                assert_eq!(owners.len(), 1, "key {} in {:?} owned by {:?}", key, ring, owners);
            }
        }
    }

    #[test]
    fn midpoint_goes_to_the_later_node() {
        // 15 is equidistant from 10 and 20
        assert!(!owns(15, 10, 20, Some(30)));
        assert!(owns(15, 20, 30, Some(10)));
    }

    #[test]
    fn lone_node_owns_everything() {
        assert!(owns(200, 7, 7, None));
        assert!(owns(200, 7, 7, Some(7)));
    }

    #[test]
    fn unknown_predecessor_does_not_block_ownership() {
        assert!(owns(22, 20, 30, None));
        assert!(!owns(28, 20, 30, None));
    }

    #[test]
    fn ownership_settles_once_the_predecessor_is_known() {
        // Ring {10, 20, 200}: before any heartbeat, Peer 10 claims keys that belong to Peer 200
        assert!(owns(150, 10, 20, None));
        assert!(!owns(150, 10, 20, Some(200)));
        assert!(owns(150, 200, 10, Some(20)));
    }

    #[test]
    fn between_handles_wrap_around() {
        assert!(is_between_on_ring(15, 10, 20));
        assert!(!is_between_on_ring(10, 10, 20));
        assert!(!is_between_on_ring(20, 10, 20));
        assert!(is_between_on_ring(252, 250, 5));
        assert!(is_between_on_ring(2, 250, 5));
        assert!(!is_between_on_ring(100, 250, 5));
        assert!(is_between_on_ring(100, 7, 7));
        assert!(!is_between_on_ring(7, 7, 7));
    }
}
