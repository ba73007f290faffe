//! `Device`: the per-device facade wrapping a `V1Channel`, its push-update
//! router, and the reconnect loop (spec.md §4.6).

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use devlink_channel::{B01Router, V1Channel, b01_router::PropertySubscription};
use devlink_transport::{backoff::Backoff, subscriber::Registry};
use devlink_wire::{Frame, protocol_tag};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    device_id::DeviceId,
    error::{Error, Result},
};

/// Initial connect attempt timeout (spec.md §4.6, §5).
const INITIAL_CONNECT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(15);
/// How often the reconnect loop checks health once a device is ready.
const HEALTH_CHECK_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

pub type ReadyCallback = devlink_transport::subscriber::Callback<()>;
pub type ReadySubscription = devlink_transport::subscriber::Subscription<()>;

/// A single consumer-facing device: send commands, subscribe to decoded
/// property updates, and be notified once the device is reachable.
///
/// `ready` latches exactly once, on the first successful connect — a later
/// transient disconnect/reconnect never re-fires `add_ready_callback`
/// (spec.md §4.6, §5).
pub struct Device {
    id: DeviceId,
    channel: Arc<V1Channel>,
    router: Arc<B01Router>,
    ready: AtomicBool,
    ready_callbacks: Arc<Registry<()>>,
    cancel: CancellationToken,
    reconnect_handle: std::sync::Mutex<Option<JoinHandle<()>>>,
    _frame_subscription: std::sync::Mutex<Option<devlink_transport::subscriber::FrameSubscription>>,
}

impl Device {
    pub fn new(id: DeviceId, channel: Arc<V1Channel>) -> Arc<Self> {
        let router = Arc::new(B01Router::new());

        let device = Arc::new(Self {
            id,
            channel: Arc::clone(&channel),
            router: Arc::clone(&router),
            ready: AtomicBool::new(false),
            ready_callbacks: Registry::new(),
            cancel: CancellationToken::new(),
            reconnect_handle: std::sync::Mutex::new(None),
            _frame_subscription: std::sync::Mutex::new(None),
        });

        let subscription = channel.subscribe(Arc::new(move |frame: Frame| {
            if frame.protocol == protocol_tag::RPC_RESPONSE {
                router.feed(frame);
            }
        }));
        *device._frame_subscription.lock().unwrap() = Some(subscription);

        device
    }

    pub fn id(&self) -> &DeviceId {
        &self.id
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Register a callback for the ready transition. Runs immediately if
    /// the device is already ready (spec.md §4.6).
    pub fn add_ready_callback(&self, callback: ReadyCallback) -> ReadySubscription {
        let subscription = self.ready_callbacks.add(Arc::clone(&callback));
        if self.is_ready() {
            callback(());
        }
        subscription
    }

    pub fn subscribe_property_updates(
        &self,
        callback: devlink_channel::b01_router::PropertyCallback,
    ) -> PropertySubscription {
        self.router.subscribe_property_updates(callback)
    }

    pub async fn send_command(&self, method: &str, params: Value) -> Result<Value> {
        self.channel.send_command(method, params).await.map_err(Error::Channel)
    }

    /// Spawn the reconnect loop if it isn't already running. Calling this
    /// more than once is a no-op (spec.md §5 "idempotent").
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.reconnect_handle.lock().unwrap();
        if handle.is_some() {
            return;
        }
        let device = Arc::clone(self);
        *handle = Some(tokio::spawn(reconnect_loop(device)));
    }

    /// Cancel the reconnect loop and drop the subscription. Safe to call
    /// from any state, any number of times (spec.md §5 "idempotent").
    pub async fn close(&self) {
        self.cancel.cancel();
        let handle = self.reconnect_handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        *self._frame_subscription.lock().unwrap() = None;
    }

    /// One connection attempt. The local leg is opened lazily by the first
    /// real `send_command` call, so all the reconnect loop needs to confirm
    /// here is that the shared MQTT session — the fallback every command
    /// can reach the device through — is up (spec.md §4.6).
    async fn try_connect(&self) -> Result<()> {
        if self.channel.is_mqtt_connected() {
            Ok(())
        } else {
            Err(Error::Channel(devlink_channel::Error::Transport(devlink_transport::Error::Disconnected(
                "mqtt session not ready".into(),
            ))))
        }
    }

    fn mark_ready(&self) {
        if !self.ready.swap(true, Ordering::AcqRel) {
            info!(device = %self.id, "device ready");
            self.ready_callbacks.dispatch(&());
        }
    }
}

async fn reconnect_loop(device: Arc<Device>) {
    let mut backoff = Backoff::default();

    loop {
        if device.cancel.is_cancelled() {
            return;
        }

        let attempt = tokio::time::timeout(INITIAL_CONNECT_TIMEOUT, device.try_connect()).await;
        match attempt {
            Ok(Ok(())) => {
                backoff.reset();
                device.mark_ready();
            },
            Ok(Err(e)) if !e.is_transient() => {
                warn!(device = %device.id, error = %e, "fatal device error, stopping reconnect loop");
                return;
            },
            Ok(Err(e)) => {
                warn!(device = %device.id, error = %e, "connect attempt failed, retrying");
            },
            Err(_) => {
                warn!(device = %device.id, "connect attempt timed out, retrying");
            },
        }

        if !device.is_ready() {
            let delay = backoff.next_delay();
            tokio::select! {
                _ = tokio::time::sleep(delay) => continue,
                _ = device.cancel.cancelled() => return,
            }
        }

        // Ready: fall back to a slow health poll instead of hammering the
        // device with connect attempts (spec.md §4.6's reconnect loop is
        // about the initial handshake; ongoing reconnects are handled
        // inside the channel's own legs).
        tokio::select! {
            _ = tokio::time::sleep(HEALTH_CHECK_INTERVAL) => continue,
            _ = device.cancel.cancelled() => return,
        }
    }
}
