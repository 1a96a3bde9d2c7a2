//! Storage infrastructure: configuration persistence and received files.
//!
//! - **`config`** – Reads and writes the TOML configuration file from the
//!   platform-appropriate directory, with defaults for every missing field.
//! - **`downloads`** – The `.part` sink an inbound file is streamed into and
//!   then renamed into place once complete.

pub mod config;
pub mod downloads;
