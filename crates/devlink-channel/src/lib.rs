//! `V1Channel` composite failover and the `B01Router` push-update
//! demultiplexer (spec.md §4.4, §4.5).

pub mod b01_router;
pub mod dedup;
pub mod envelope;
pub mod error;
pub mod network_info;
pub mod v1_channel;

pub use b01_router::B01Router;
pub use error::{Error, Result};
pub use network_info::NetworkInfo;
pub use v1_channel::{V1Channel, V1ChannelConfig, default_cloud_only_methods};
