//! Infrastructure layer for the LanLink node.
//!
//! Contains OS-facing adapters: UDP discovery, TCP sessions, configuration
//! persistence, and the download directory.
//!
//! **Dependency rule**: this layer may depend on `application` and
//! `lanlink_core`, but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
