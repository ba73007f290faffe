//! The cached result of `get_network_info`, used by [`crate::V1Channel`] to
//! know which IP to open its local leg against (spec.md §4.4).

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Used when a caller doesn't have a `FamilyConfig` to derive a TTL from
/// (e.g. direct construction in tests).
pub const DEFAULT_TTL: Duration = Duration::from_secs(12 * 60 * 60);

/// `(ip, ssid, bssid, mac)` as reported by the device's `get_network_info`
/// RPC (spec.md §3). Only `ip` is read by `V1Channel`; the rest round-trips
/// through the cache for embedders that want it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NetworkInfo {
    pub ip: String,
    #[serde(default)]
    pub ssid: String,
    #[serde(default)]
    pub bssid: String,
    #[serde(default)]
    pub mac: String,
}

/// A `NetworkInfo` plus the instant it was fetched and the TTL it was
/// fetched under, so `V1Channel` can tell a fresh value from a stale one
/// without touching wall-clock time itself.
#[derive(Debug, Clone)]
pub struct CachedNetworkInfo {
    pub info: NetworkInfo,
    fetched_at: Instant,
    ttl: Duration,
}

impl CachedNetworkInfo {
    pub fn new(info: NetworkInfo, ttl: Duration) -> Self {
        Self { info, fetched_at: Instant::now(), ttl }
    }

    pub fn is_fresh(&self) -> bool {
        self.fetched_at.elapsed() < self.ttl
    }
}
