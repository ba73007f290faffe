//! Transport-level errors (spec.md §7).
//!
//! Codec failures are recovered locally by the decoder and never reach this
//! enum directly; what does reach it is everything that must be surfaced to
//! a caller or trigger the reconnect loop.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An RPC waiter did not receive a matching response in time.
    #[error("request timed out")]
    Timeout,

    /// The transport closed (or was never open) during an operation.
    #[error("transport disconnected: {0}")]
    Disconnected(String),

    /// A decoded envelope did not have the expected shape (missing `dps`,
    /// non-JSON payload, unexpected response shape, ...).
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// MQTT client error from the underlying session.
    #[error("mqtt error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),

    /// I/O error from the local TCP channel.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Transient errors are worth retrying (triggers the reconnect loop);
    /// non-transient ("fatal"/programming) errors terminate it instead
    /// (spec.md §4.6, §9).
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout | Self::Disconnected(_) | Self::Mqtt(_) | Self::Io(_))
    }
}
