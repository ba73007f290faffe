//! `B01Router`: the async inbound demultiplexer for the push-style device
//! family (spec.md §4.5).
//!
//! A bounded queue plus one consumer task classifies and dispatches inbound
//! frames, mirroring the single-consumer-task fan-in `devlink_transport`
//! uses for the shared MQTT session, scaled down to one device.

use std::collections::HashMap;

use devlink_wire::{Frame, protocol_tag};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use devlink_transport::subscriber::{Callback, Registry, Subscription};

/// Decoded-DP dictionary: integer DP id to its raw JSON value.
pub type PropertyUpdate = HashMap<i64, Value>;
pub type PropertyCallback = Callback<PropertyUpdate>;
pub type PropertySubscription = Subscription<PropertyUpdate>;

const QUEUE_CAPACITY: usize = 256;
/// DP id the "common" envelope is nested under (spec.md §4.5, §8).
const COMMON_ENVELOPE_DP: &str = "101";

pub struct B01Router {
    inbound: mpsc::Sender<Frame>,
    property_updates: std::sync::Arc<Registry<PropertyUpdate>>,
}

impl B01Router {
    pub fn new() -> Self {
        let property_updates = Registry::new();
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        tokio::spawn(Self::consume(rx, std::sync::Arc::clone(&property_updates)));
        Self { inbound: tx, property_updates }
    }

    pub fn subscribe_property_updates(&self, callback: PropertyCallback) -> PropertySubscription {
        self.property_updates.add(callback)
    }

    /// Enqueue a decoded inbound frame. Frames that fail decrypt/CRC never
    /// reach here — the channel's `FrameDecoder` already dropped them.
    pub fn feed(&self, frame: Frame) {
        if self.inbound.try_send(frame).is_err() {
            warn!("b01 router inbound queue full, dropping frame");
        }
    }

    async fn consume(mut rx: mpsc::Receiver<Frame>, property_updates: std::sync::Arc<Registry<PropertyUpdate>>) {
        while let Some(frame) = rx.recv().await {
            match frame.protocol {
                protocol_tag::RPC_RESPONSE => match parse_and_flatten(&frame.payload) {
                    Ok(update) => property_updates.dispatch(&update),
                    Err(e) => debug!(error = %e, "dropping unparseable property update"),
                },
                protocol_tag::MAP_RESPONSE => {
                    debug!("map response received, map pipeline not wired up");
                },
                other => {
                    debug!(protocol = other, "unclassified b01 frame, dropping");
                },
            }
        }
    }
}

impl Default for B01Router {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a decrypted B01 payload's `dps` map and apply the DP-101
/// flattening rule: entries nested under `"101"` (the "common" envelope)
/// are hoisted to the top level, with the nested entry winning any key
/// collision (spec.md §8, §9 open question).
fn parse_and_flatten(payload: &[u8]) -> Result<PropertyUpdate, serde_json::Error> {
    #[derive(serde::Deserialize)]
    struct Envelope {
        dps: HashMap<String, Value>,
    }

    let envelope: Envelope = serde_json::from_slice(payload)?;
    let mut flattened = PropertyUpdate::new();

    for (key, value) in &envelope.dps {
        if key == COMMON_ENVELOPE_DP {
            continue;
        }
        if let Ok(dp) = key.parse::<i64>() {
            flattened.insert(dp, value.clone());
        }
    }

    if let Some(Value::Object(nested)) = envelope.dps.get(COMMON_ENVELOPE_DP) {
        for (key, value) in nested {
            if let Ok(dp) = key.parse::<i64>() {
                flattened.insert(dp, value.clone()); // nested wins on collision
            }
        }
    }

    Ok(flattened)
}
