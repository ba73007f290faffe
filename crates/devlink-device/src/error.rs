//! Device-facade-level errors (spec.md §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Channel(#[from] devlink_channel::Error),

    /// Persisted cache bytes failed to deserialize; the cache is treated as
    /// empty rather than propagated further (spec.md §7).
    #[error("cache corrupt: {0}")]
    CacheCorrupt(String),

    /// A programming error the reconnect loop must not retry.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl Error {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Channel(e) => e.is_transient(),
            Self::CacheCorrupt(_) | Self::Fatal(_) => false,
        }
    }
}
