//! # lanlink-core
//!
//! Shared library for LanLink containing the peer wire protocol, the
//! discovery datagram format, and the small pieces of domain logic that do
//! not touch sockets: the expiring peer registry, the connection tie-break
//! rule, and file-transfer progress accounting.
//!
//! This crate has no dependency on an async runtime or on OS networking APIs,
//! so everything in it can be exercised with plain `#[test]` functions.
//!
//! # Architecture overview
//!
//! LanLink lets devices on one LAN find each other by UDP broadcast and then
//! talk over direct TCP sessions: short text messages and whole files.
//!
//! - **`protocol`** – How bytes travel over the network.  Every TCP frame is a
//!   one-byte command tag followed by a tag-specific payload; discovery uses a
//!   single prefixed text datagram.
//!
//! - **`domain`** – Pure logic.  [`PeerRegistry`] remembers who announced
//!   themselves recently, [`should_initiate`] decides which side of a pair
//!   dials, and [`Transfer`] tracks how far a file has moved.

pub mod domain;
pub mod protocol;

pub use domain::peer::{should_initiate, PeerAddress};
pub use domain::registry::{PeerRegistry, DEFAULT_EXPIRY};
pub use domain::transfer::{sanitize_file_name, ProgressThrottle, Transfer};
pub use protocol::codec::{decode_frame, encode_frame, ProtocolError};
pub use protocol::frame::{Command, Frame};
