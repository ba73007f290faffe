//! The process-wide shared MQTT session (spec.md §2 "Session", §4.2, §5).
//!
//! One `Session` owns the socket, serializes publishes, and broadcasts
//! received messages to interested `MqttChannel`s by topic match. It
//! reconnects with exponential backoff and re-subscribes all known topics
//! before surfacing "ready", mirroring the single-consumer-task fan-in
//! pattern `moltis-mcp::McpManager` uses for its client map.

use std::sync::Arc;

use dashmap::DashMap;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Packet, QoS};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::{
    backoff::Backoff,
    subscriber::{RawCallback, RawRegistry, RawSubscription},
};

/// Shared handle to the cloud message bus. Cheap to clone; all clones refer
/// to the same underlying connection.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    client: AsyncClient,
    topics: DashMap<String, Arc<RawRegistry>>,
    ready: watch::Sender<bool>,
}

impl Session {
    /// Open the session and spawn its background event loop task.
    pub fn connect(options: MqttOptions) -> Self {
        let (client, eventloop) = AsyncClient::new(options, 256);
        let (ready_tx, _ready_rx) = watch::channel(false);
        let inner = Arc::new(Inner {
            client,
            topics: DashMap::new(),
            ready: ready_tx,
        });

        let session = Self { inner };
        tokio::spawn(Self::run(eventloop, session.clone()));
        session
    }

    /// Resolves once the session has completed its first successful
    /// connect (or immediately, if already ready).
    pub async fn wait_ready(&self) {
        let mut rx = self.inner.ready.subscribe();
        if *rx.borrow() {
            return;
        }
        let _ = rx.changed().await;
    }

    pub fn is_ready(&self) -> bool {
        *self.inner.ready.subscribe().borrow()
    }

    /// Publish raw bytes to `topic` at QoS 1. Concurrent publishers are
    /// serialized by the underlying client, not by this method.
    pub async fn publish(&self, topic: &str, payload: Vec<u8>) -> crate::error::Result<()> {
        self.inner
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
            .map_err(crate::error::Error::from)
    }

    /// Register a raw-bytes callback for `topic`. Sends a broker SUBSCRIBE
    /// the first time this topic gains a subscriber.
    pub fn subscribe(&self, topic: &str, callback: RawCallback) -> RawSubscription {
        let is_new = !self.inner.topics.contains_key(topic);
        let registry = self.inner.topics.entry(topic.to_string()).or_insert_with(RawRegistry::new).clone();
        let subscription = registry.add(callback);

        if is_new {
            let client = self.inner.client.clone();
            let topic = topic.to_string();
            tokio::spawn(async move {
                if let Err(e) = client.subscribe(&topic, QoS::AtLeastOnce).await {
                    warn!(topic = %topic, error = %e, "failed to subscribe to topic");
                }
            });
        }

        subscription
    }

    async fn run(mut eventloop: EventLoop, session: Session) {
        let mut backoff = Backoff::default();
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    backoff.reset();
                    Self::resubscribe_all(&session).await;
                    let _ = session.inner.ready.send(true);
                    info!("mqtt session ready");
                },
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(topic = %publish.topic, len = publish.payload.len(), "mqtt message received");
                    if let Some(registry) = session.inner.topics.get(publish.topic.as_str()) {
                        registry.dispatch(&publish.payload.to_vec());
                    }
                },
                Ok(_other) => {},
                Err(e) => {
                    warn!(error = %e, "mqtt event loop error, reconnecting");
                    let _ = session.inner.ready.send(false);
                    let delay = backoff.next_delay();
                    tokio::time::sleep(delay).await;
                },
            }
        }
    }

    async fn resubscribe_all(session: &Session) {
        for entry in session.inner.topics.iter() {
            if let Err(e) = session.inner.client.subscribe(entry.key(), QoS::AtLeastOnce).await {
                warn!(topic = %entry.key(), error = %e, "failed to resubscribe after reconnect");
            }
        }
    }
}
