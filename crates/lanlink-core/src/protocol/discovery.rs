//! Presence datagram exchanged on the discovery port.
//!
//! ```text
//! LANLINK_v1|<identity>
//! ```
//!
//! Only the prefix matters to receivers; the identity after the separator is
//! informational (the sender's node name).  Anything else arriving on the
//! discovery port is ignored.

/// Default UDP port for presence broadcasts.
pub const DEFAULT_DISCOVERY_PORT: u16 = 8888;

/// Protocol tag that opens every presence datagram.
pub const PROTOCOL_TAG: &str = "LANLINK_v1";

/// Tag plus separator, i.e. the exact byte prefix receivers check.
pub const PROTOCOL_PREFIX: &str = "LANLINK_v1|";

/// A parsed presence announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Announcement {
    /// Free-form identity of the sender (usually its node name).
    pub identity: String,
}

/// Builds the datagram payload announcing `identity`.
pub fn encode_announcement(identity: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PROTOCOL_PREFIX.len() + identity.len());
    buf.extend_from_slice(PROTOCOL_PREFIX.as_bytes());
    buf.extend_from_slice(identity.as_bytes());
    buf
}

/// Parses a received datagram.
///
/// Returns `None` for anything that does not start with [`PROTOCOL_PREFIX`].
/// A non-UTF-8 identity is decoded lossily rather than rejected.
pub fn parse_announcement(datagram: &[u8]) -> Option<Announcement> {
    let rest = datagram.strip_prefix(PROTOCOL_PREFIX.as_bytes())?;
    Some(Announcement {
        identity: String::from_utf8_lossy(rest).into_owned(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_announcement_prefixes_identity() {
        assert_eq!(encode_announcement("alice"), b"LANLINK_v1|alice".to_vec());
    }

    #[test]
    fn test_parse_announcement_extracts_identity() {
        let parsed = parse_announcement(b"LANLINK_v1|bob-laptop").unwrap();
        assert_eq!(parsed.identity, "bob-laptop");
    }

    #[test]
    fn test_parse_announcement_accepts_empty_identity() {
        let parsed = parse_announcement(b"LANLINK_v1|").unwrap();
        assert_eq!(parsed.identity, "");
    }

    #[test]
    fn test_parse_announcement_rejects_foreign_protocol() {
        assert!(parse_announcement(b"OTHERAPP_v1|carol").is_none());
        assert!(parse_announcement(b"IAM_HERE").is_none());
    }

    #[test]
    fn test_parse_announcement_rejects_tag_without_separator() {
        assert!(parse_announcement(PROTOCOL_TAG.as_bytes()).is_none());
    }

    #[test]
    fn test_parse_announcement_tolerates_garbage_identity_bytes() {
        let mut datagram = PROTOCOL_PREFIX.as_bytes().to_vec();
        datagram.extend_from_slice(&[0xFF, 0xFE, b'x']);
        let parsed = parse_announcement(&datagram).unwrap();
        assert!(parsed.identity.ends_with('x'));
    }

    #[test]
    fn test_parse_announcement_rejects_empty_datagram() {
        assert!(parse_announcement(&[]).is_none());
    }
}
