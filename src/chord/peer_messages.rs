use std::fmt;
use std::str::FromStr;

use crate::error::{Result, RingError};
use crate::key_space::{FileId, PeerId};

/// Separates the three top-level fields of a frame
const FIELD_DELIMITER: char = ',';
/// Separates the sub-fields of a structured payload
const PAYLOAD_DELIMITER: char = '_';

/// Which of the two successor (or predecessor) positions a value refers to
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Slot {
    /// The nearer neighbour, encoded as `0`
    First,
    /// The farther neighbour, encoded as `1`
    Second,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::First => Slot::Second,
            Slot::Second => Slot::First,
        }
    }

    fn index(self) -> u8 {
        match self {
            Slot::First => 0,
            Slot::Second => 1,
        }
    }

    fn from_index(index: u8) -> Option<Slot> {
        match index {
            0 => Some(Slot::First),
            1 => Some(Slot::Second),
            _ => None,
        }
    }
}

/// All messages exchanged between peers, on both transports
///
/// Every variant carries its payload as typed fields; the flat text representation only exists
/// inside [`Frame::encode`] and [`Frame::decode`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum PeerMessage {
    /// Asks to be inserted into the ring. Carries the peer the joiner originally contacted.
    Join { contact: PeerId },
    /// Admits a joiner, handing over its new successor pair
    Accepted { first: PeerId, second: PeerId },
    /// Asks the receiver to propose a replacement for a lost successor of the sender
    Update { lost: PeerId },
    /// Overwrites the receiver's second successor
    Inform { second: PeerId },
    /// Answer to [`PeerMessage::Update`]: the peer that should follow the sender
    FindSuccessor { successor: PeerId },
    /// Announces a graceful departure along with the departing node's successors
    Quit { first: PeerId, second: PeerId },
    Request { file: FileId },
    Store { file: FileId },
    /// Announces that the requested file is being delivered over the file transfer port
    Found { file: FileId },
    /// Heartbeat: the receiver should record the sender as its predecessor in `slot`
    Ping { slot: Slot, sequence: u64 },
    /// Heartbeat acknowledgement echoing the ping's sequence number
    Response { sequence: u64 },
}

impl PeerMessage {
    /// Name of the query on the wire
    pub fn query(&self) -> &'static str {
        match self {
            PeerMessage::Join { .. } => "join",
            PeerMessage::Accepted { .. } => "accepted",
            PeerMessage::Update { .. } => "update",
            PeerMessage::Inform { .. } => "inform",
            PeerMessage::FindSuccessor { .. } => "find_successor",
            PeerMessage::Quit { .. } => "quit",
            PeerMessage::Request { .. } => "request",
            PeerMessage::Store { .. } => "store",
            PeerMessage::Found { .. } => "found",
            PeerMessage::Ping { .. } => "ping",
            PeerMessage::Response { .. } => "response",
        }
    }

    /// Heartbeats travel over datagrams, everything else over the reliable control plane
    pub fn is_heartbeat(&self) -> bool {
        matches!(self, PeerMessage::Ping { .. } | PeerMessage::Response { .. })
    }

    fn payload(&self) -> String {
        match *self {
            PeerMessage::Join { contact } => contact.to_string(),
            PeerMessage::Accepted { first, second } | PeerMessage::Quit { first, second } => {
                format!("{}{}{}", first, PAYLOAD_DELIMITER, second)
            }
            PeerMessage::Update { lost } => lost.to_string(),
            PeerMessage::Inform { second } => second.to_string(),
            PeerMessage::FindSuccessor { successor } => successor.to_string(),
            PeerMessage::Request { file }
            | PeerMessage::Store { file }
            | PeerMessage::Found { file } => file.to_string(),
            PeerMessage::Ping { slot, sequence } => {
                format!("{}{}{}", slot.index(), PAYLOAD_DELIMITER, sequence)
            }
            PeerMessage::Response { sequence } => sequence.to_string(),
        }
    }
}

/// A message together with the peer it is attributed to
///
/// The origin is not always the sender: forwarded `join`, `store` and `request` frames keep the
/// peer that started the walk.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame {
    pub origin: PeerId,
    pub message: PeerMessage,
}

impl Frame {
    pub fn new(origin: PeerId, message: PeerMessage) -> Self {
        Frame { origin, message }
    }

    /// Renders the frame as `query,origin,payload`
    pub fn encode(&self) -> String {
        format!(
            "{}{}{}{}{}",
            self.message.query(),
            FIELD_DELIMITER,
            self.origin,
            FIELD_DELIMITER,
            self.message.payload()
        )
    }

    /// Parses a frame, splitting on the first two delimiters only
    pub fn decode(frame: &str) -> Result<Frame> {
        let trimmed = frame.trim_end_matches(['\r', '\n', '\0']);
        let mut fields = trimmed.splitn(3, FIELD_DELIMITER);
        let query = fields
            .next()
            .filter(|q| !q.is_empty())
            .ok_or_else(|| RingError::malformed(frame, "missing query"))?;
        let origin: PeerId = parse_field(fields.next(), frame, "origin")?;
        let payload = fields
            .next()
            .ok_or_else(|| RingError::malformed(frame, "missing payload"))?;

        let message = match query {
            "join" => PeerMessage::Join {
                contact: parse_field(Some(payload), frame, "contact")?,
            },
            "accepted" => {
                let (first, second) = parse_pair(payload, frame)?;
                PeerMessage::Accepted { first, second }
            }
            "update" => PeerMessage::Update {
                lost: parse_field(Some(payload), frame, "lost peer")?,
            },
            "inform" => PeerMessage::Inform {
                second: parse_field(Some(payload), frame, "second successor")?,
            },
            "find_successor" => PeerMessage::FindSuccessor {
                successor: parse_field(Some(payload), frame, "successor")?,
            },
            "quit" => {
                let (first, second) = parse_pair(payload, frame)?;
                PeerMessage::Quit { first, second }
            }
            "request" => PeerMessage::Request {
                file: parse_field(Some(payload), frame, "file")?,
            },
            "store" => PeerMessage::Store {
                file: parse_field(Some(payload), frame, "file")?,
            },
            "found" => PeerMessage::Found {
                file: parse_field(Some(payload), frame, "file")?,
            },
            "ping" => {
                let (slot, sequence) = payload
                    .split_once(PAYLOAD_DELIMITER)
                    .ok_or_else(|| RingError::malformed(frame, "missing ping sequence"))?;
                let slot = Slot::from_index(parse_field(Some(slot), frame, "slot")?)
                    .ok_or_else(|| RingError::malformed(frame, "slot out of range"))?;
                PeerMessage::Ping {
                    slot,
                    sequence: parse_field(Some(sequence), frame, "sequence")?,
                }
            }
            "response" => PeerMessage::Response {
                sequence: parse_field(Some(payload), frame, "sequence")?,
            },
            _ => return Err(RingError::malformed(frame, "unknown query")),
        };
        Ok(Frame { origin, message })
    }

    /// Decodes a raw frame received from the network
    pub fn decode_bytes(bytes: &[u8]) -> Result<Frame> {
        let text = std::str::from_utf8(bytes)
            .map_err(|_| RingError::MalformedMessage("frame is not valid UTF-8".into()))?;
        Frame::decode(text)
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

fn parse_field<T: FromStr>(field: Option<&str>, frame: &str, name: &str) -> Result<T> {
    field
        .map(str::trim)
        .and_then(|field| field.parse().ok())
        .ok_or_else(|| RingError::malformed(frame, &format!("invalid {}", name)))
}

fn parse_pair(payload: &str, frame: &str) -> Result<(PeerId, PeerId)> {
    let (first, second) = payload
        .split_once(PAYLOAD_DELIMITER)
        .ok_or_else(|| RingError::malformed(frame, "expected a successor pair"))?;
    Ok((
        parse_field(Some(first), frame, "first successor")?,
        parse_field(Some(second), frame, "second successor")?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_the_original_wire_format() {
        let frame = Frame::new(14, PeerMessage::Accepted { first: 19, second: 2 });
        assert_eq!(frame.encode(), "accepted,14,19_2");

        let frame = Frame::new(2, PeerMessage::Ping { slot: Slot::Second, sequence: 3 });
        assert_eq!(frame.encode(), "ping,2,1_3");

        let frame = Frame::new(8, PeerMessage::FindSuccessor { successor: 12 });
        assert_eq!(frame.encode(), "find_successor,8,12");
    }

    #[test]
    fn decodes_every_query() {
        let cases = [
            ("join,15,4", PeerMessage::Join { contact: 4 }),
            ("accepted,14,19_2", PeerMessage::Accepted { first: 19, second: 2 }),
            ("update,3,5", PeerMessage::Update { lost: 5 }),
            ("inform,3,9", PeerMessage::Inform { second: 9 }),
            ("find_successor,3,9", PeerMessage::FindSuccessor { successor: 9 }),
            ("quit,5,8_9", PeerMessage::Quit { first: 8, second: 9 }),
            ("request,5,2012", PeerMessage::Request { file: 2012 }),
            ("store,5,2012", PeerMessage::Store { file: 2012 }),
            ("found,5,2012", PeerMessage::Found { file: 2012 }),
            ("ping,2,0_7", PeerMessage::Ping { slot: Slot::First, sequence: 7 }),
            ("response,4,7", PeerMessage::Response { sequence: 7 }),
        ];
        for (raw, message) in cases {
            let frame = Frame::decode(raw).unwrap();
            assert_eq!(frame.message, message, "decoding {}", raw);
            assert_eq!(frame.encode(), raw);
        }
    }

    #[test]
    fn payload_is_split_only_on_the_first_two_delimiters() {
        // Trailing garbage stays inside the payload and then fails the typed parse
        assert!(Frame::decode("request,5,12,13").is_err());
        assert_eq!(
            Frame::decode("store,5,12\n").unwrap().message,
            PeerMessage::Store { file: 12 }
        );
    }

    #[test]
    fn rejects_garbage_without_panicking() {
        for raw in [
            "",
            "join",
            "join,15",
            "join,abc,4",
            "join,300,4",
            "ping,2,3",
            "ping,2,2_3",
            "ping,2,0_x",
            "accepted,1,19",
            "teleport,1,2",
            ",1,2",
        ] {
            assert!(
                matches!(Frame::decode(raw), Err(RingError::MalformedMessage(_))),
                "{:?} should be rejected",
                raw
            );
        }
        assert!(Frame::decode_bytes(&[0xff, 0xfe, b',']).is_err());
    }

    #[test]
    fn heartbeats_are_told_apart() {
        assert!(PeerMessage::Ping { slot: Slot::First, sequence: 1 }.is_heartbeat());
        assert!(PeerMessage::Response { sequence: 1 }.is_heartbeat());
        assert!(!PeerMessage::Store { file: 1 }.is_heartbeat());
    }
}
