//! Frame-level I/O over tokio streams.
//!
//! The codec in `lanlink_core` works on byte slices.  A live session instead
//! reads a command tag, then exactly the payload that tag implies, so these
//! helpers pull one field at a time from an [`AsyncRead`].  Writing goes the
//! other way: a whole frame is encoded up front and written in one call, so a
//! frame is never half-built when a write fails.
//!
//! Unexpected end-of-stream is reported as [`LinkError::Closed`] rather than
//! as a raw I/O error; it is the normal way a peer goes away.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use lanlink_core::protocol::codec::{decode_utf8, encode_frame, ProtocolError};
use lanlink_core::{Command, Frame};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Errors that end a session.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The peer closed the stream.
    #[error("connection closed by peer")]
    Closed,

    /// Any other socket error.
    #[error("I/O error: {0}")]
    Io(#[source] io::Error),

    /// The byte stream did not follow the frame format.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Nothing arrived from the peer for longer than the liveness timeout.
    #[error("no data from peer for {0:?}")]
    LivenessTimeout(Duration),

    /// The stream ended inside a file body.
    #[error("file body ended after {received} of {expected} bytes")]
    TruncatedFile { expected: u64, received: u64 },

    /// A local file got shorter while it was being sent.
    #[error("{} ended after {sent} of {expected} announced bytes", .path.display())]
    SourceShrank {
        path: PathBuf,
        expected: u64,
        sent: u64,
    },
}

impl From<io::Error> for LinkError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof => LinkError::Closed,
            _ => LinkError::Io(e),
        }
    }
}

// ── Reading ───────────────────────────────────────────────────────────────────

/// Reads the next command tag.
///
/// # Errors
///
/// [`LinkError::Protocol`] for a tag outside `0..=3`, [`LinkError::Closed`] at
/// end of stream.
pub async fn read_command<R>(reader: &mut R) -> Result<Command, LinkError>
where
    R: AsyncRead + Unpin,
{
    let tag = reader.read_u8().await?;
    Command::try_from(tag).map_err(|t| LinkError::Protocol(ProtocolError::UnknownCommand(t)))
}

/// Reads a u16-length-prefixed UTF-8 string.
pub async fn read_string<R>(reader: &mut R) -> Result<String, LinkError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u16().await? as usize;
    let mut raw = vec![0u8; len];
    reader.read_exact(&mut raw).await?;
    Ok(decode_utf8(raw)?)
}

/// Reads the fixed part of a FILE frame after its tag: name and size.
pub async fn read_file_header<R>(reader: &mut R) -> Result<(String, u64), LinkError>
where
    R: AsyncRead + Unpin,
{
    let file_name = read_string(reader).await?;
    let size = reader.read_u64().await?;
    Ok((file_name, size))
}

// ── Writing ───────────────────────────────────────────────────────────────────

/// Encodes `frame` and writes it.  Does not flush.
///
/// # Errors
///
/// [`LinkError::Protocol`] if the frame cannot be encoded (nothing is written
/// in that case), otherwise any write error.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), LinkError>
where
    W: AsyncWrite + Unpin,
{
    let bytes = encode_frame(frame)?;
    writer.write_all(&bytes).await?;
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
