//! `DeviceManager`: enumerates devices from home data, constructs their
//! channels, and owns the shared MQTT session and cache (spec.md §2, §4.6).

use std::{collections::HashMap, sync::Arc};

use devlink_channel::V1Channel;
use devlink_transport::{MqttChannel, Session};
use serde::{Deserialize, Serialize};

use crate::{cache::Cache, config::FamilyConfig, device::Device, device_id::DeviceId};

/// One device as listed in home data (spec.md §3 "Device identity").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub duid: DeviceId,
    pub local_key: String,
    pub product_model: String,
    pub product_family: String,
}

/// Account credentials home data is derived from (spec.md §6 "Topic
/// format"): `client` is deterministic so every process run reconstructs
/// the same topic pair for a given account.
pub struct AccountCredentials {
    pub user: String,
    pub rriot_u: String,
    pub rriot_s: String,
    pub rriot_k: String,
}

/// `client` = first 8 hex characters of `md5(rriot_u || ":" || rriot_k)`
/// (spec.md §6). It is both the topic-pair segment and the MQTT username.
fn mqtt_client(rriot_u: &str, rriot_k: &str) -> String {
    let digest = md5::compute(format!("{rriot_u}:{rriot_k}").as_bytes());
    format!("{digest:x}")[..8].to_string()
}

/// MQTT password = last 16 hex characters of `md5(rriot_s || ":" || rriot_k)`
/// (spec.md §6).
fn mqtt_password(rriot_s: &str, rriot_k: &str) -> String {
    let digest = md5::compute(format!("{rriot_s}:{rriot_k}").as_bytes());
    let hex = format!("{digest:x}");
    hex[hex.len() - 16..].to_string()
}

fn report_topic(user: &str, client: &str, duid: &str) -> String {
    format!("rr/m/o/{user}/{client}/{duid}")
}

fn publish_topic(user: &str, client: &str, duid: &str) -> String {
    format!("rr/m/i/{user}/{client}/{duid}")
}

/// Set the MQTT username/password `options` must carry to authenticate to
/// the cloud broker (spec.md §6). Call this before `Session::connect`.
pub fn apply_credentials(options: &mut rumqttc::MqttOptions, credentials: &AccountCredentials) {
    let username = mqtt_client(&credentials.rriot_u, &credentials.rriot_k);
    let password = mqtt_password(&credentials.rriot_s, &credentials.rriot_k);
    options.set_credentials(username, password);
}

pub struct DeviceManager {
    session: Session,
    cache: Arc<Cache>,
    config: FamilyConfig,
    devices: std::sync::Mutex<HashMap<DeviceId, Arc<Device>>>,
}

impl DeviceManager {
    pub fn new(session: Session, cache: Arc<Cache>, config: FamilyConfig) -> Self {
        Self {
            session,
            cache,
            config,
            devices: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Build (or return the existing) `Device` for every descriptor in
    /// `home_data`, wiring a per-device `MqttChannel` onto the shared
    /// session and a `V1Channel` composite around it.
    pub fn sync_devices(self: &Arc<Self>, credentials: &AccountCredentials, home_data: &[DeviceDescriptor]) -> Vec<Arc<Device>> {
        let client = mqtt_client(&credentials.rriot_u, &credentials.rriot_k);

        home_data
            .iter()
            .map(|descriptor| self.device_for(&client, &credentials.user, descriptor))
            .collect()
    }

    fn device_for(self: &Arc<Self>, client: &str, user: &str, descriptor: &DeviceDescriptor) -> Arc<Device> {
        let mut devices = self.devices.lock().unwrap();
        if let Some(device) = devices.get(&descriptor.duid) {
            return Arc::clone(device);
        }

        let report = report_topic(user, client, descriptor.duid.as_str());
        let publish = publish_topic(user, client, descriptor.duid.as_str());
        let local_key = descriptor.local_key.clone().into_bytes();

        let mqtt = Arc::new(MqttChannel::new(
            self.session.clone(),
            &report,
            publish,
            local_key.clone(),
            self.config.request_timeout(),
        ));
        let channel = V1Channel::new(mqtt, local_key, self.config.cloud_only_methods.clone(), self.config.v1_channel_config());
        let device = Device::new(descriptor.duid.clone(), channel);

        if let Some(info) = self.cache.network_info(&descriptor.duid) {
            tracing::debug!(duid = %descriptor.duid, ip = %info.ip, "restored cached network info");
        }

        devices.insert(descriptor.duid.clone(), Arc::clone(&device));
        device
    }

    pub fn get_device(&self, duid: &DeviceId) -> Option<Arc<Device>> {
        self.devices.lock().unwrap().get(duid).cloned()
    }

    pub fn get_devices(&self) -> Vec<Arc<Device>> {
        self.devices.lock().unwrap().values().cloned().collect()
    }

    pub fn cache(&self) -> &Arc<Cache> {
        &self.cache
    }

    /// Close every managed device. Idempotent (spec.md §5).
    pub async fn close_all(&self) {
        let devices: Vec<Arc<Device>> = self.devices.lock().unwrap().values().cloned().collect();
        for device in devices {
            device.close().await;
        }
    }
}
