//! `V1Channel`: the composite local-preferred/cloud-fallback channel
//! (spec.md §4.4).

use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use devlink_transport::{
    LocalChannel, LocalChannelConfig, MqttChannel,
    subscriber::{FrameCallback, FrameRegistry, FrameSubscription},
};
use devlink_wire::{Frame, ProtocolVersion, protocol_tag};
use rand::Rng;
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    dedup::DedupRing,
    envelope,
    error::{Error, Result},
    network_info::{self, CachedNetworkInfo, NetworkInfo},
};

const DEDUP_CAPACITY: usize = 64;

/// The default cloud-only method allow-list: empty (spec.md §9). Which
/// methods a given device family only accepts over the cloud bus is
/// firmware-dependent and outside this crate's authority; callers populate
/// their own set at `V1Channel`/`DeviceManager` construction.
pub fn default_cloud_only_methods() -> HashSet<String> {
    HashSet::new()
}

/// The subset of `devlink_device::FamilyConfig` that `V1Channel` and the
/// `LocalChannel`s it opens need (spec.md §4.3, §4.4, §5 "Timeouts").
#[derive(Debug, Clone, Copy)]
pub struct V1ChannelConfig {
    pub local: LocalChannelConfig,
    pub network_info_ttl: Duration,
}

impl Default for V1ChannelConfig {
    fn default() -> Self {
        Self {
            local: LocalChannelConfig::default(),
            network_info_ttl: network_info::DEFAULT_TTL,
        }
    }
}

pub struct V1Channel {
    mqtt: Arc<MqttChannel>,
    local: Mutex<Option<Arc<LocalChannel>>>,
    local_subscription: Mutex<Option<FrameSubscription>>,
    local_key: Vec<u8>,
    network_info: Mutex<Option<CachedNetworkInfo>>,
    cloud_only_methods: HashSet<String>,
    config: V1ChannelConfig,
    dedup: Mutex<DedupRing>,
    subscribers: Arc<FrameRegistry>,
    _mqtt_subscription: FrameSubscription,
}

impl V1Channel {
    pub fn new(
        mqtt: Arc<MqttChannel>,
        local_key: impl Into<Vec<u8>>,
        cloud_only_methods: HashSet<String>,
        config: V1ChannelConfig,
    ) -> Arc<Self> {
        let subscribers = FrameRegistry::new();
        let dedup = Mutex::new(DedupRing::new(DEDUP_CAPACITY));

        Arc::new_cyclic(|weak: &std::sync::Weak<Self>| {
            let weak = weak.clone();
            let mqtt_subscription = mqtt.subscribe(Arc::new(move |frame: Frame| {
                if let Some(this) = weak.upgrade() {
                    this.dispatch_if_new(frame);
                }
            }));

            Self {
                mqtt,
                local: Mutex::new(None),
                local_subscription: Mutex::new(None),
                local_key: local_key.into(),
                network_info: Mutex::new(None),
                cloud_only_methods,
                config,
                dedup,
                subscribers,
                _mqtt_subscription: mqtt_subscription,
            }
        })
    }

    fn dispatch_if_new(&self, frame: Frame) {
        if self.dedup.lock().unwrap().observe(frame.protocol, frame.sequence) {
            self.subscribers.dispatch(&frame);
        }
    }

    pub fn subscribe(self: &Arc<Self>, callback: FrameCallback) -> FrameSubscription {
        self.subscribers.add(callback)
    }

    pub fn is_mqtt_connected(&self) -> bool {
        self.mqtt.is_connected()
    }

    pub async fn is_local_connected(&self) -> bool {
        match self.local.lock().unwrap().clone() {
            Some(local) => local.is_connected().await,
            None => false,
        }
    }

    /// Ensure the local leg is connected, using the cached IP if fresh,
    /// refreshing it over MQTT otherwise, and falling back to a stale IP if
    /// refresh is impossible (spec.md §4.4, §8 scenario 5).
    async fn ensure_local(self: &Arc<Self>) -> Result<Arc<LocalChannel>> {
        if let Some(local) = self.local.lock().unwrap().clone() {
            if local.is_connected().await {
                return Ok(local);
            }
        }

        let ip = self.resolve_ip().await?;
        let local = Arc::new(LocalChannel::new(ip.clone(), self.local_key.clone(), None, self.config.local));
        local.connect().await.map_err(Error::Transport)?;

        let weak_self = Arc::downgrade(self);
        let subscription = local.subscribe(Arc::new(move |frame: Frame| {
            if let Some(this) = weak_self.upgrade() {
                this.dispatch_if_new(frame);
            }
        }));

        *self.local_subscription.lock().unwrap() = Some(subscription);
        *self.local.lock().unwrap() = Some(Arc::clone(&local));
        info!(ip = %ip, "local channel connected");
        Ok(local)
    }

    async fn resolve_ip(self: &Arc<Self>) -> Result<String> {
        let cached = self.network_info.lock().unwrap().clone();
        if let Some(cached) = &cached {
            if cached.is_fresh() {
                return Ok(cached.info.ip.clone());
            }
        }

        match self.fetch_network_info().await {
            Ok(info) => {
                let ip = info.ip.clone();
                *self.network_info.lock().unwrap() = Some(CachedNetworkInfo::new(info, self.config.network_info_ttl));
                Ok(ip)
            },
            Err(e) => match cached {
                Some(stale) => {
                    warn!(error = %e, ip = %stale.info.ip, "network info refresh failed, using stale cache");
                    Ok(stale.info.ip)
                },
                None => Err(e),
            },
        }
    }

    async fn fetch_network_info(self: &Arc<Self>) -> Result<NetworkInfo> {
        let result = self.send_over_mqtt("get_network_info", Value::Array(Vec::new())).await?;
        serde_json::from_value(result).map_err(|e| Error::ProtocolError(format!("malformed network info: {e}")))
    }

    fn is_cloud_only(&self, method: &str) -> bool {
        self.cloud_only_methods.contains(method)
    }

    async fn send_over_mqtt(&self, method: &str, params: Value) -> Result<Value> {
        let id = random_request_id();
        let payload = envelope::encode_request(id, method, params, unix_seconds());
        let frame = Frame {
            protocol: protocol_tag::RPC_REQUEST,
            sequence: 0,
            random: 0,
            timestamp: unix_seconds(),
            version: ProtocolVersion::V1_0,
            payload,
        };
        let response = self.mqtt.send_request(frame, protocol_tag::RPC_RESPONSE).await.map_err(Error::Transport)?;
        envelope::decode_response(&response.payload, method, id)
    }

    async fn send_over_local(self: &Arc<Self>, method: &str, params: Value) -> Result<Value> {
        let local = self.ensure_local().await?;
        let id = random_request_id();
        let payload = envelope::encode_request(id, method, params, unix_seconds());
        let frame = Frame {
            protocol: protocol_tag::RPC_REQUEST,
            sequence: 0,
            random: 0,
            timestamp: unix_seconds(),
            version: ProtocolVersion::V1_0,
            payload,
        };
        let response = local.send_request(frame, protocol_tag::RPC_RESPONSE).await.map_err(Error::Transport)?;
        envelope::decode_response(&response.payload, method, id)
    }

    /// Send an RPC, preferring the local leg and falling back to MQTT once
    /// on a transient local failure; cloud-only methods always go straight
    /// to MQTT (spec.md §4.4).
    pub async fn send_command(self: &Arc<Self>, method: &str, params: Value) -> Result<Value> {
        if self.is_cloud_only(method) {
            return self.send_over_mqtt(method, params).await;
        }

        match self.send_over_local(method, params.clone()).await {
            Ok(result) => Ok(result),
            Err(e) if e.is_transient() => {
                warn!(method, error = %e, "local command failed, retrying over mqtt");
                *self.local.lock().unwrap() = None;
                self.send_over_mqtt(method, params).await
            },
            Err(e) => Err(e),
        }
    }
}

fn unix_seconds() -> u32 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// RPC body ids live in 10000..999999 (spec.md §6 "GENERAL request").
fn random_request_id() -> u32 {
    rand::rng().random_range(10_000..1_000_000)
}
