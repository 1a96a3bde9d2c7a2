//! Protocol module containing the frame types, the binary codec, and the
//! discovery datagram format.

pub mod codec;
pub mod discovery;
pub mod frame;

pub use codec::{decode_frame, encode_frame, ProtocolError};
pub use frame::{Command, Frame};
