//! Codec-level error kinds.
//!
//! These are always recovered locally: the streaming decoder logs the
//! failure, drops the offending frame, and advances past it. Nothing here
//! propagates to a caller on its own; `devlink-transport` is the layer that
//! decides whether a codec failure should also tear down a connection.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The frame's trailing CRC-32 did not match the computed value.
    #[error("crc mismatch: expected {expected:#010x}, computed {computed:#010x}")]
    BadCrc { expected: u32, computed: u32 },

    /// Fewer bytes were available than the declared frame length requires.
    #[error("short frame: need {needed} bytes, have {available}")]
    ShortFrame { needed: usize, available: usize },

    /// The 3-byte protocol version tag did not match a known dialect.
    #[error("unknown protocol version: {0:?}")]
    UnknownVersion([u8; 3]),

    /// AES encrypt/decrypt (or PKCS#7 padding) failed.
    #[error("payload decrypt/encrypt failed: {0}")]
    DecryptFail(String),
}
