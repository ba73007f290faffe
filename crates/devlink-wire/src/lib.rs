//! Binary frame layout, CRC and AES codecs for the device channel wire
//! protocol. See spec.md §3 and §4.1.

pub mod codec;
pub mod crypto;
pub mod error;
pub mod frame;

pub use codec::{FrameCodec, FrameDecoder};
pub use error::{Error, Result};
pub use frame::{Frame, MAGIC, ProtocolVersion, protocol_tag};
