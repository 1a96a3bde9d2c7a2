//! Peer identity and the connection tie-break rule.

use std::fmt;
use std::net::IpAddr;

/// Network identity of a peer: its IP address in text form.
///
/// Equality is exact string equality and the ordering is plain lexicographic
/// string ordering, which is what the tie-break rule compares.  Note that
/// lexicographic order is not numeric order (`"10.0.0.9" > "10.0.0.10"`); it
/// only has to be total and identical on both sides.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PeerAddress(String);

impl PeerAddress {
    /// Wraps an address string as-is.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parses the address as an IP, if it is one.
    pub fn ip(&self) -> Option<IpAddr> {
        self.0.parse().ok()
    }
}

impl From<IpAddr> for PeerAddress {
    fn from(ip: IpAddr) -> Self {
        // IPv4-mapped IPv6 senders (dual-stack sockets) are keyed by their
        // IPv4 form so both families agree on one identity.
        let ip = match ip {
            IpAddr::V6(v6) => v6.to_ipv4_mapped().map(IpAddr::V4).unwrap_or(IpAddr::V6(v6)),
            v4 => v4,
        };
        Self(ip.to_string())
    }
}

impl From<&str> for PeerAddress {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl From<String> for PeerAddress {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Returns `true` if the local side must open the TCP session to `remote`.
///
/// Only the side whose own address sorts greater dials; the other waits for
/// the inbound connection.  For any pair of distinct addresses exactly one
/// side gets `true`.  A node never dials itself.
pub fn should_initiate(local: &PeerAddress, remote: &PeerAddress) -> bool {
    local > remote
}
