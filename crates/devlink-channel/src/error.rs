//! Channel-level errors (spec.md §7): transport failures plus device-
//! reported command failures.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] devlink_transport::Error),

    /// The device executed the RPC and reported a failure, carrying its own
    /// method name and error code (spec.md §7).
    #[error("command {method} failed with code {code}: {message}")]
    CommandError { method: String, code: i32, message: String },

    /// A decoded response's JSON shape didn't match what the caller asked
    /// for.
    #[error("protocol error: {0}")]
    ProtocolError(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_transient(),
            Self::CommandError { .. } | Self::ProtocolError(_) => false,
        }
    }
}
