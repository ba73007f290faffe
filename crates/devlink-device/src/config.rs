//! Device-family constants grouped into a loadable config, mirroring
//! `moltis-config`'s TOML loader at a scale that fits one crate
//! (spec.md §0.3).

use std::{collections::HashSet, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

fn default_local_port() -> u16 {
    devlink_transport::LOCAL_PORT
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_keepalive_secs() -> u64 {
    10
}

fn default_network_info_ttl_secs() -> u64 {
    12 * 60 * 60
}

/// Per-device-family tunables (spec.md §4.3 "fixed port per family",
/// §5 "Timeouts"). Consumed by `DeviceManager::device_for` when it builds
/// each device's `LocalChannel`/`MqttChannel`/`V1Channel`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyConfig {
    #[serde(default = "default_local_port")]
    pub local_port: u16,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
    #[serde(default = "default_network_info_ttl_secs")]
    pub network_info_ttl_secs: u64,
    #[serde(default)]
    pub cloud_only_methods: HashSet<String>,
}

impl Default for FamilyConfig {
    fn default() -> Self {
        Self {
            local_port: default_local_port(),
            request_timeout_secs: default_request_timeout_secs(),
            keepalive_secs: default_keepalive_secs(),
            network_info_ttl_secs: default_network_info_ttl_secs(),
            cloud_only_methods: devlink_channel::default_cloud_only_methods(),
        }
    }
}

impl FamilyConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn network_info_ttl(&self) -> Duration {
        Duration::from_secs(self.network_info_ttl_secs)
    }

    /// Build the `LocalChannel` tunables this config describes. The HELLO
    /// handshake reuses `request_timeout`: the config has no separate knob
    /// for it, and in practice a device that can't complete a handshake
    /// within the RPC timeout isn't one worth falling back to slower.
    pub fn local_channel_config(&self) -> devlink_transport::LocalChannelConfig {
        devlink_transport::LocalChannelConfig {
            port: self.local_port,
            hello_timeout: self.request_timeout(),
            request_timeout: self.request_timeout(),
            keepalive_interval: self.keepalive(),
        }
    }

    pub fn v1_channel_config(&self) -> devlink_channel::V1ChannelConfig {
        devlink_channel::V1ChannelConfig {
            local: self.local_channel_config(),
            network_info_ttl: self.network_info_ttl(),
        }
    }
}

/// Top-level config: one `FamilyConfig` per protocol dialect
/// (spec.md §3 "family tag selects the protocol dialect").
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub v1: FamilyConfig,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| Error::Fatal(format!("read config {}: {e}", path.as_ref().display())))?;
        toml::from_str(&raw).map_err(|e| Error::Fatal(format!("parse config: {e}")))
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let raw = toml::to_string_pretty(self).map_err(|e| Error::Fatal(format!("serialize config: {e}")))?;
        std::fs::write(path, raw).map_err(|e| Error::Fatal(format!("write config: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_family_config_matches_documented_timeouts() {
        let config = FamilyConfig::default();
        assert_eq!(config.local_port, 58867);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.keepalive(), Duration::from_secs(10));
        assert_eq!(config.network_info_ttl(), Duration::from_secs(12 * 60 * 60));
        assert!(config.cloud_only_methods.is_empty());
    }

    #[test]
    fn round_trips_through_toml() {
        let mut config = Config::default();
        config.v1.cloud_only_methods.insert("get_network_info".into());
        let raw = toml::to_string_pretty(&config).unwrap();
        let reloaded: Config = toml::from_str(&raw).unwrap();
        assert!(reloaded.v1.cloud_only_methods.contains("get_network_info"));
    }
}
