//! Domain layer: pure logic with no I/O.
//!
//! - **`peer`** – the [`PeerAddress`](peer::PeerAddress) identity and the
//!   tie-break rule that elects which side of a pair opens the TCP session.
//! - **`registry`** – the time-windowed set of recently announced peers.
//! - **`transfer`** – byte accounting and progress throttling for one file.

pub mod peer;
pub mod registry;
pub mod transfer;
