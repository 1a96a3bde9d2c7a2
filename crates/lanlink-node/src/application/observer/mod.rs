//! Observer interface between the transport core and its consumer.
//!
//! The transport invokes these callbacks from its own tasks and threads.  An
//! implementation that drives a UI is responsible for marshalling the events
//! onto its rendering thread; implementations must not block for long, since
//! the read loop of the reporting session waits for the callback to return.
//!
//! Events flow through two hops: each [`Connection`] reports to a relay owned
//! by the session manager, which updates its own bookkeeping and forwards the
//! event unchanged to the consumer's observer.
//!
//! [`Connection`]: crate::infrastructure::network::connection::Connection

use std::path::PathBuf;

use lanlink_core::PeerAddress;

pub mod mock;

/// How a file transfer ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Every byte of an outbound file was written to the peer.
    Sent,
    /// An inbound file arrived completely and was moved to `path`.
    Saved { path: PathBuf },
    /// The transfer did not complete.
    Failed { reason: String },
}

/// Receiver of per-peer session events.
pub trait ConnectionObserver: Send + Sync {
    /// A text message arrived from `address`.
    fn on_message(&self, address: &PeerAddress, text: &str);

    /// The session with `address` came up (`true`) or went down (`false`).
    ///
    /// Fired exactly once per transition.
    fn on_status_change(&self, address: &PeerAddress, online: bool);

    /// Progress of a transfer to or from `address`, in percent (0–100).
    ///
    /// Reports are rate-limited.  A successful transfer always ends with
    /// exactly one report of 100.
    fn on_file_progress(&self, address: &PeerAddress, file_name: &str, percent: u8);

    /// A transfer finished, successfully or not.
    ///
    /// Optional; the default implementation ignores the event.
    fn on_transfer_finished(
        &self,
        _address: &PeerAddress,
        _file_name: &str,
        _outcome: &TransferOutcome,
    ) {
    }
}
