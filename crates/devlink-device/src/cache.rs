//! Pluggable byte store for network info and discovered home state
//! (spec.md §3 "CacheRecord", §4.6's "Cache is a single instance shared
//! among Devices and the DeviceManager").

use std::{collections::HashMap, sync::Mutex};

use devlink_channel::NetworkInfo;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    device_id::DeviceId,
    error::{Error, Result},
};

/// Everything the cache persists, keyed where applicable by `DeviceId`.
/// Unknown fields round-trip through `serde_json::Value` so a newer client
/// writing extra fields doesn't get them silently dropped by an older one
/// (spec.md §6 "forward-compatible").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheRecord {
    #[serde(default)]
    pub home_data: Value,
    #[serde(default)]
    pub network_info: HashMap<DeviceId, NetworkInfo>,
    #[serde(default)]
    pub home_map_info: HashMap<String, Value>,
    #[serde(default)]
    pub home_map_content: HashMap<String, Value>,
    #[serde(default)]
    pub device_features: HashMap<DeviceId, Value>,
    #[serde(default)]
    pub trait_data: HashMap<DeviceId, Value>,
    #[serde(flatten)]
    pub unknown: HashMap<String, Value>,
}

/// Hook for swapping the persisted byte format without touching callers
/// (spec.md's SPEC_FULL "CacheCodec"). The default is JSON.
pub trait CacheCodec: Send + Sync {
    fn encode(&self, record: &CacheRecord) -> Result<Vec<u8>>;
    fn decode(&self, bytes: &[u8]) -> Result<CacheRecord>;
}

pub struct JsonCacheCodec;

impl CacheCodec for JsonCacheCodec {
    fn encode(&self, record: &CacheRecord) -> Result<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| Error::Fatal(format!("cache serialize: {e}")))
    }

    fn decode(&self, bytes: &[u8]) -> Result<CacheRecord> {
        serde_json::from_slice(bytes).map_err(|e| Error::CacheCorrupt(e.to_string()))
    }
}

/// Shared mutable `CacheRecord` plus the byte codec used to load/flush it.
pub struct Cache {
    record: Mutex<CacheRecord>,
    codec: Box<dyn CacheCodec>,
}

impl Cache {
    pub fn new(codec: Box<dyn CacheCodec>) -> Self {
        Self { record: Mutex::new(CacheRecord::default()), codec }
    }

    /// Load from persisted bytes. Corrupt bytes are treated as an empty
    /// cache rather than propagated (spec.md §7 "CacheCorrupt").
    pub fn load(codec: Box<dyn CacheCodec>, bytes: &[u8]) -> Self {
        let record = match codec.decode(bytes) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(error = %e, "cache corrupt, starting empty");
                CacheRecord::default()
            },
        };
        Self { record: Mutex::new(record), codec }
    }

    pub fn flush(&self) -> Result<Vec<u8>> {
        self.codec.encode(&self.record.lock().unwrap())
    }

    pub fn network_info(&self, device: &DeviceId) -> Option<NetworkInfo> {
        self.record.lock().unwrap().network_info.get(device).cloned()
    }

    pub fn set_network_info(&self, device: DeviceId, info: NetworkInfo) {
        self.record.lock().unwrap().network_info.insert(device, info);
    }

    pub fn with_record<R>(&self, f: impl FnOnce(&mut CacheRecord) -> R) -> R {
        f(&mut self.record.lock().unwrap())
    }
}
