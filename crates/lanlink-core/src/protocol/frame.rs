//! Frame types for the LanLink peer protocol.
//!
//! Wire format (TCP, one frame after another, no outer header):
//!
//! | tag | name      | payload                                                  |
//! |-----|-----------|----------------------------------------------------------|
//! | 0   | HEARTBEAT | none                                                     |
//! | 1   | MSG       | u16 length + UTF-8 text                                  |
//! | 2   | FILE      | u16 length + UTF-8 name, u64 size, then `size` raw bytes |
//! | 3   | ACK       | none                                                     |
//!
//! All multi-byte integers are big-endian.

/// Default TCP port peers listen on.
pub const DEFAULT_PEER_PORT: u16 = 5000;

/// Largest string payload a length prefix can describe.
pub const MAX_STRING_LEN: usize = u16::MAX as usize;

/// Size of the FILE frame's size field in bytes.
pub const FILE_SIZE_FIELD_LEN: usize = 8;

// ── Command tags ──────────────────────────────────────────────────────────────

/// One-byte command tag that starts every frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Command {
    Heartbeat = 0x00,
    Message = 0x01,
    File = 0x02,
    Ack = 0x03,
}

impl TryFrom<u8> for Command {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Command::Heartbeat),
            0x01 => Ok(Command::Message),
            0x02 => Ok(Command::File),
            0x03 => Ok(Command::Ack),
            other => Err(other),
        }
    }
}

// ── Frames ────────────────────────────────────────────────────────────────────

/// A decoded protocol frame.
///
/// `FileHeader` covers only the fixed part of a FILE frame.  The `size` raw
/// bytes that follow it are streamed by the connection and never held in a
/// `Frame`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Keep-alive sent by the watchdog.  No payload.
    Heartbeat,
    /// A chat message.
    Message(String),
    /// Start of a file transfer.
    FileHeader { file_name: String, size: u64 },
    /// Liveness signal sent by a receiver during a long transfer.  No payload.
    Ack,
}

impl Frame {
    /// Returns the command tag this frame is sent with.
    pub fn command(&self) -> Command {
        match self {
            Frame::Heartbeat => Command::Heartbeat,
            Frame::Message(_) => Command::Message,
            Frame::FileHeader { .. } => Command::File,
            Frame::Ack => Command::Ack,
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_try_from_accepts_all_defined_tags() {
        assert_eq!(Command::try_from(0), Ok(Command::Heartbeat));
        assert_eq!(Command::try_from(1), Ok(Command::Message));
        assert_eq!(Command::try_from(2), Ok(Command::File));
        assert_eq!(Command::try_from(3), Ok(Command::Ack));
    }

    #[test]
    fn test_command_try_from_rejects_unknown_tag() {
        assert_eq!(Command::try_from(4), Err(4));
        assert_eq!(Command::try_from(0xFF), Err(0xFF));
    }

    #[test]
    fn test_frame_command_matches_variant() {
        assert_eq!(Frame::Heartbeat.command(), Command::Heartbeat);
        assert_eq!(Frame::Message("hi".into()).command(), Command::Message);
        assert_eq!(
            Frame::FileHeader {
                file_name: "a.txt".into(),
                size: 3
            }
            .command(),
            Command::File
        );
        assert_eq!(Frame::Ack.command(), Command::Ack);
    }
}
