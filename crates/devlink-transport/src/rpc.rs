//! Request/response correlation over a channel's decoded frame stream
//! (spec.md §3 "PendingRequest", §8).

use std::{collections::HashMap, sync::Mutex, time::Duration};

use devlink_wire::Frame;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// `(request_id, expected_protocol)` — the key a `PendingRequest` is
/// completed by. `request_id` is the frame `sequence` the request was sent
/// with; devices echo it back on the matching response.
type WaiterKey = (u32, u16);

/// Tracks in-flight requests for one channel, keyed by `(request_id,
/// expected_protocol)`. A waiter is completed, cancelled, or timed out —
/// never more than one of those (spec.md §3).
#[derive(Default)]
pub struct RpcWaiters {
    pending: Mutex<HashMap<WaiterKey, oneshot::Sender<Frame>>>,
}

impl RpcWaiters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for a request about to be published. Must be
    /// called before the frame is handed to the transport, so a response
    /// that arrives immediately can't race ahead of registration.
    fn register(&self, request_id: u32, expected_protocol: u16) -> oneshot::Receiver<Frame> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().unwrap().insert((request_id, expected_protocol), tx);
        rx
    }

    /// Called from the channel's frame dispatch path for every inbound
    /// frame. Returns `true` if the frame matched (and consumed) a pending
    /// waiter.
    pub fn complete(&self, frame: &Frame) -> bool {
        let key = (frame.sequence, frame.protocol);
        if let Some(tx) = self.pending.lock().unwrap().remove(&key) {
            let _ = tx.send(frame.clone());
            true
        } else {
            false
        }
    }

    /// Remove a waiter without completing it (used when `send` itself
    /// fails, so a later same-sequence response can't resurrect a stale
    /// registration).
    fn cancel(&self, request_id: u32, expected_protocol: u16) {
        self.pending.lock().unwrap().remove(&(request_id, expected_protocol));
    }

    pub fn inflight_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    /// Publish `frame` via `publish` and await a response matching
    /// `(frame.sequence, expected_protocol)`, or time out after `timeout`.
    pub async fn send<F, Fut>(&self, frame: Frame, expected_protocol: u16, timeout: Duration, publish: F) -> Result<Frame>
    where
        F: FnOnce(Frame) -> Fut,
        Fut: std::future::Future<Output = Result<()>>,
    {
        let request_id = frame.sequence;
        let rx = self.register(request_id, expected_protocol);

        if let Err(e) = publish(frame).await {
            self.cancel(request_id, expected_protocol);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_canceled)) => Err(Error::Disconnected("channel closed while awaiting response".into())),
            Err(_elapsed) => {
                self.cancel(request_id, expected_protocol);
                Err(Error::Timeout)
            },
        }
    }

    /// Fail every pending waiter with `Disconnected` (spec.md §4.3 "pending
    /// requests complete with a disconnected error").
    pub fn fail_all_disconnected(&self) {
        let mut pending = self.pending.lock().unwrap();
        for (_, tx) in pending.drain() {
            drop(tx); // dropping the sender completes the receiver with Err(RecvError)
        }
    }
}
