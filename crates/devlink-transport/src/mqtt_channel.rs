//! The cloud MQTT channel to a single device (spec.md §3 "MqttChannel",
//! §4.2).
//!
//! Many `MqttChannel`s share one [`Session`]; each owns its own
//! [`FrameDecoder`] (and therefore its own `local_key`) and subscribes to
//! its device's report topic, publishing requests on its command topic.
//! MQTT traffic never negotiates "L01": it is always legacy AES-128-ECB
//! framing, since there is no per-connection HELLO over the cloud bus.

use std::{sync::Arc, time::Duration};

use devlink_wire::{Frame, FrameCodec, FrameDecoder};
use rand::Rng;
use tracing::warn;

use crate::{
    error::{Error, Result},
    rpc::RpcWaiters,
    session::Session,
    subscriber::{FrameCallback, FrameRegistry, FrameSubscription},
};

/// Used when a caller doesn't have a `FamilyConfig` to derive one from (e.g.
/// direct construction in tests).
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct MqttChannel {
    session: Session,
    publish_topic: String,
    codec: FrameCodec,
    request_timeout: Duration,
    waiters: Arc<RpcWaiters>,
    subscribers: Arc<FrameRegistry>,
    _topic_subscription: crate::subscriber::RawSubscription,
}

impl MqttChannel {
    /// `report_topic`/`publish_topic` are the device's per-family MQTT
    /// topics (spec.md §4.2 names these "rpc up"/"rpc down"); `request_timeout`
    /// bounds how long `send_request` waits for a matching response
    /// (spec.md §5 "Timeouts").
    pub fn new(
        session: Session,
        report_topic: &str,
        publish_topic: impl Into<String>,
        local_key: impl Into<Vec<u8>>,
        request_timeout: Duration,
    ) -> Self {
        let codec = FrameCodec::new(local_key);
        let subscribers = FrameRegistry::new();
        let waiters = Arc::new(RpcWaiters::new());
        let decoder = std::sync::Mutex::new(FrameDecoder::new(codec.clone()));
        let dispatch_subscribers = Arc::clone(&subscribers);
        let dispatch_waiters = Arc::clone(&waiters);

        let topic_subscription = session.subscribe(
            report_topic,
            Arc::new(move |bytes: Vec<u8>| {
                let mut decoder = decoder.lock().unwrap();
                for result in decoder.feed(&bytes) {
                    match result {
                        Ok(frame) => {
                            dispatch_waiters.complete(&frame);
                            dispatch_subscribers.dispatch(&frame);
                        },
                        Err(e) => warn!(error = %e, "dropping undecodable mqtt frame"),
                    }
                }
            }),
        );

        Self {
            session,
            publish_topic: publish_topic.into(),
            codec,
            request_timeout,
            waiters,
            subscribers,
            _topic_subscription: topic_subscription,
        }
    }

    pub fn subscribe(&self, callback: FrameCallback) -> FrameSubscription {
        self.subscribers.add(callback)
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_ready()
    }

    fn encode(&self, frame: &Frame) -> Result<Vec<u8>> {
        self.codec.encode(frame).map_err(|e| Error::ProtocolError(e.to_string()))
    }

    /// Publish a frame without awaiting a response (spec.md §4.5
    /// fire-and-forget outbound).
    pub async fn publish(&self, frame: Frame) -> Result<()> {
        let encoded = self.encode(&frame)?;
        self.session.publish(&self.publish_topic, encoded).await.map_err(Error::from)
    }

    /// Send a request and await its matching response, keyed by
    /// `(frame.sequence, response_protocol)` (spec.md §3 "PendingRequest").
    pub async fn send_request(&self, mut frame: Frame, response_protocol: u16) -> Result<Frame> {
        frame.sequence = rand::rng().random();
        let encoded = self.encode(&frame)?;
        let topic = self.publish_topic.clone();
        let session = self.session.clone();
        self.waiters
            .send(frame, response_protocol, self.request_timeout, move |_frame| async move {
                session.publish(&topic, encoded).await.map_err(Error::from)
            })
            .await
    }
}
