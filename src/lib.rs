//! A small Chord-style ring of peers storing and serving numbered files.
//!
//! Every peer has an ID in `[0, 255]`, which also serves as its coordinate for file keys.
//! A file `f` lives on the peer closest to `f mod 256` on the ring.
//!
//! # Architecture:
//! Each peer knows two successors and, by observing who pings it, two predecessors.
//! - Joining peers walk the ring until they reach the peer whose arc they fall into,
//!   which splices them in behind itself ([`chord::membership`])
//! - Peers ping both successors every interval and declare one lost once it falls
//!   `max_timeout` heartbeats behind the other ([`chord::failure_detector`])
//! - `store` and `request` operations hop from successor to successor until they reach the
//!   owner of the file's key ([`chord::routing`], [`key_space`])
//! - Departing peers hand their successors to their predecessors
//!
//! Control messages travel as one text frame per TCP connection, heartbeats as UDP datagrams on
//! the same port number (`base_port + id`), and file contents over a dedicated connection to
//! `base_port + id + file_port_offset` ([`file_transfer`]).
//!
//! # Main executable:
//! ```bash
//! ring_dht init <id> <first successor> <second successor> <ping interval>
//! ring_dht join <id> <known peer> <ping interval>
//! ```
//! An optional `-c <config>` pointing to an INI file overrides the defaults described in
//! [`config`]. Once running, the peer reads `request <file>`, `store <file>`, `status` and
//! `quit` from standard input.
//!
//! We support different levels of logging, with the default being `info`.
//! You can change the log level by setting the `RUST_LOG` environment variable to one of
//! `error`, `warn`, `info`, `debug` or `trace`.
//!
//! ## Testing:
//! ```bash
//! cargo test --release
//! ```
//! The multi-peer scenarios in the test suite start complete rings on localhost.
pub mod chord;
pub mod config;
pub mod console;
pub mod error;
pub mod file_transfer;
pub mod key_space;
