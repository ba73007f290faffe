//! `MqttChannel`, `LocalChannel` and request/response correlation over the
//! device wire protocol (spec.md §3, §4.2, §4.3).

pub mod backoff;
pub mod error;
pub mod local_channel;
pub mod mqtt_channel;
pub mod rpc;
pub mod session;
pub mod subscriber;

pub use error::{Error, Result};
pub use local_channel::{LOCAL_PORT, LocalChannel, LocalChannelConfig};
pub use mqtt_channel::MqttChannel;
pub use session::Session;
