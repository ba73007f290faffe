//! Device façade, reconnect loop, `DeviceManager`, and the persisted cache
//! (spec.md §4.6).

pub mod cache;
pub mod config;
pub mod device;
pub mod device_id;
pub mod device_manager;
pub mod error;

pub use cache::{Cache, CacheCodec, CacheRecord, JsonCacheCodec};
pub use config::{Config, FamilyConfig};
pub use device::Device;
pub use device_id::DeviceId;
pub use device_manager::{AccountCredentials, DeviceDescriptor, DeviceManager, apply_credentials};
pub use error::{Error, Result};
