//! Binary codec for LanLink frames.
//!
//! Encoding produces the exact bytes that go on the wire for one frame.
//! Decoding works on a byte slice that may hold a partial frame, in which case
//! [`ProtocolError::InsufficientData`] tells the caller to read more.
//!
//! For a FILE frame only the header (tag, name, size) is encoded or decoded
//! here; the raw file bytes that follow are streamed separately.

use crate::protocol::frame::{Command, Frame, FILE_SIZE_FIELD_LEN, MAX_STRING_LEN};
use thiserror::Error;

/// Errors that can occur during frame encoding or decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The byte slice is shorter than the frame it starts.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The command tag is not one of the four defined values.
    #[error("unknown command tag: 0x{0:02X}")]
    UnknownCommand(u8),

    /// A string does not fit in a u16 length prefix.
    #[error("string of {len} bytes exceeds the {max} byte limit")]
    StringTooLong { len: usize, max: usize },

    /// A length-prefixed string is not valid UTF-8.
    #[error("string payload is not valid UTF-8")]
    InvalidUtf8,
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes one [`Frame`] into its wire bytes.
///
/// # Errors
///
/// Returns [`ProtocolError::StringTooLong`] if a message text or file name is
/// longer than 65535 bytes once encoded as UTF-8.
///
/// # Examples
///
/// ```rust
/// use lanlink_core::protocol::{encode_frame, Frame};
///
/// let bytes = encode_frame(&Frame::Message("hello".into())).unwrap();
/// assert_eq!(bytes, [0x01, 0x00, 0x05, b'h', b'e', b'l', b'l', b'o']);
/// ```
pub fn encode_frame(frame: &Frame) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::with_capacity(encoded_len_hint(frame));
    buf.push(frame.command() as u8);
    match frame {
        Frame::Heartbeat | Frame::Ack => {}
        Frame::Message(text) => write_length_prefixed_string(&mut buf, text)?,
        Frame::FileHeader { file_name, size } => {
            write_length_prefixed_string(&mut buf, file_name)?;
            buf.extend_from_slice(&size.to_be_bytes());
        }
    }
    Ok(buf)
}

/// Decodes one [`Frame`] from the beginning of `bytes`.
///
/// Returns the frame and the number of bytes it occupied.  For a FILE frame
/// the count covers the header only; the file body starts right after it.
///
/// # Errors
///
/// Returns [`ProtocolError::InsufficientData`] when `bytes` ends mid-frame,
/// [`ProtocolError::UnknownCommand`] for an undefined tag, and
/// [`ProtocolError::InvalidUtf8`] for a malformed string payload.
pub fn decode_frame(bytes: &[u8]) -> Result<(Frame, usize), ProtocolError> {
    let tag = *bytes.first().ok_or(ProtocolError::InsufficientData {
        needed: 1,
        available: 0,
    })?;
    let command = Command::try_from(tag).map_err(ProtocolError::UnknownCommand)?;

    match command {
        Command::Heartbeat => Ok((Frame::Heartbeat, 1)),
        Command::Ack => Ok((Frame::Ack, 1)),
        Command::Message => {
            let (text, end) = read_length_prefixed_string(bytes, 1)?;
            Ok((Frame::Message(text), end))
        }
        Command::File => {
            let (file_name, name_end) = read_length_prefixed_string(bytes, 1)?;
            let size = read_u64(bytes, name_end)?;
            Ok((Frame::FileHeader { file_name, size }, name_end + FILE_SIZE_FIELD_LEN))
        }
    }
}

/// Converts a received string payload into a `String`.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] if the bytes are not valid UTF-8.
pub fn decode_utf8(bytes: Vec<u8>) -> Result<String, ProtocolError> {
    String::from_utf8(bytes).map_err(|_| ProtocolError::InvalidUtf8)
}

/// Appends a u16 big-endian length followed by the UTF-8 bytes of `s`.
///
/// # Errors
///
/// Returns [`ProtocolError::StringTooLong`] if `s` is longer than 65535 bytes.
pub fn write_length_prefixed_string(buf: &mut Vec<u8>, s: &str) -> Result<(), ProtocolError> {
    let len = s.len();
    if len > MAX_STRING_LEN {
        return Err(ProtocolError::StringTooLong {
            len,
            max: MAX_STRING_LEN,
        });
    }
    buf.extend_from_slice(&(len as u16).to_be_bytes());
    buf.extend_from_slice(s.as_bytes());
    Ok(())
}

/// Reads a u16-length-prefixed UTF-8 string starting at `offset`.
///
/// Returns the string and the offset of the first byte after it.
pub fn read_length_prefixed_string(
    bytes: &[u8],
    offset: usize,
) -> Result<(String, usize), ProtocolError> {
    require_len(bytes, offset + 2)?;
    let len = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]) as usize;
    let start = offset + 2;
    let end = start + len;
    require_len(bytes, end)?;
    let s = std::str::from_utf8(&bytes[start..end])
        .map_err(|_| ProtocolError::InvalidUtf8)?
        .to_owned();
    Ok((s, end))
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn read_u64(bytes: &[u8], offset: usize) -> Result<u64, ProtocolError> {
    require_len(bytes, offset + 8)?;
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    Ok(u64::from_be_bytes(raw))
}

fn require_len(bytes: &[u8], needed: usize) -> Result<(), ProtocolError> {
    if bytes.len() < needed {
        return Err(ProtocolError::InsufficientData {
            needed,
            available: bytes.len(),
        });
    }
    Ok(())
}

fn encoded_len_hint(frame: &Frame) -> usize {
    match frame {
        Frame::Heartbeat | Frame::Ack => 1,
        Frame::Message(text) => 3 + text.len(),
        Frame::FileHeader { file_name, .. } => 3 + file_name.len() + FILE_SIZE_FIELD_LEN,
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
