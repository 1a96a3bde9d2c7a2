//! Network infrastructure for the LanLink node.
//!
//! # Sub-modules
//!
//! - **`wire`** – Async reads and writes of single protocol frames over any
//!   tokio stream, plus the [`LinkError`](wire::LinkError) taxonomy.
//!
//! - **`connection`** – One [`Connection`](connection::Connection) per remote
//!   peer: the Offline/Connecting/Online state machine, heartbeat watchdog,
//!   reconnection, read loop, and chunked file transfer.
//!
//! - **`session_manager`** – Owns the address → connection map, accepts
//!   inbound sockets, applies the tie-break rule, and relays events.
//!
//! - **`discovery`** – UDP presence broadcaster and listener feeding the
//!   peer registry.

pub mod connection;
pub mod discovery;
pub mod session_manager;
pub mod wire;
