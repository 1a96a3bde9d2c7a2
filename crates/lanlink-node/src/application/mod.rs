//! Application layer for the LanLink node.
//!
//! This layer defines what the node reports to whoever embeds it.  It holds
//! no sockets and no file handles.
//!
//! # Sub-modules
//!
//! - **`observer`** – The [`ConnectionObserver`](observer::ConnectionObserver)
//!   capability trait through which sessions report messages, status changes,
//!   and transfer progress, plus a recording implementation for tests.

pub mod observer;
