//! The direct-TCP local channel to a single device (spec.md §3
//! "LocalChannel", §4.2, §4.3).
//!
//! Ported in spirit from the Python reference's `LocalChannel`: connect,
//! negotiate a protocol version with HELLO (trying the preferred version
//! first and falling back to the other), then exchange request/response
//! frames and periodic keepalive PINGs until the socket drops.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use devlink_wire::{Frame, FrameCodec, FrameDecoder, ProtocolVersion, protocol_tag};
use rand::Rng;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    sync::Mutex as AsyncMutex,
};
use tracing::{debug, warn};

use crate::{
    error::{Error, Result},
    rpc::RpcWaiters,
    subscriber::{FrameCallback, FrameRegistry, FrameSubscription},
};

/// Fixed port devices listen on for local connections (Python reference
/// `roborock.devices.local_channel._PORT`). This is the default a
/// `LocalChannelConfig` starts from; callers that need to override it (test
/// harnesses, non-standard firmware) set `LocalChannelConfig::port`.
pub const LOCAL_PORT: u16 = 58867;
const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Per-family tunables for [`LocalChannel`] (spec.md §4.3, §5 "Timeouts").
/// Constructed from `devlink_device::FamilyConfig` in normal use; test
/// harnesses build one directly to use short timeouts.
#[derive(Debug, Clone, Copy)]
pub struct LocalChannelConfig {
    pub port: u16,
    pub hello_timeout: Duration,
    pub request_timeout: Duration,
    pub keepalive_interval: Duration,
}

impl Default for LocalChannelConfig {
    fn default() -> Self {
        Self {
            port: LOCAL_PORT,
            hello_timeout: DEFAULT_HELLO_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }
}

/// A connected local channel. `connect()` performs the handshake; the
/// returned channel is live until `close()` or the socket drops.
pub struct LocalChannel {
    host: String,
    local_key: Vec<u8>,
    preferred_version: Option<ProtocolVersion>,
    config: LocalChannelConfig,
    state: Arc<AsyncMutex<Option<ConnectionState>>>,
    subscribers: Arc<FrameRegistry>,
    waiters: Arc<RpcWaiters>,
}

struct ConnectionState {
    writer: tokio::net::tcp::OwnedWriteHalf,
    codec: FrameCodec,
    version: ProtocolVersion,
    connect_nonce: u16,
}

impl LocalChannel {
    pub fn new(
        host: impl Into<String>,
        local_key: impl Into<Vec<u8>>,
        preferred_version: Option<ProtocolVersion>,
        config: LocalChannelConfig,
    ) -> Self {
        Self {
            host: host.into(),
            local_key: local_key.into(),
            preferred_version,
            config,
            state: Arc::new(AsyncMutex::new(None)),
            subscribers: FrameRegistry::new(),
            waiters: Arc::new(RpcWaiters::new()),
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.is_some()
    }

    pub fn subscribe(&self, callback: FrameCallback) -> FrameSubscription {
        self.subscribers.add(callback)
    }

    /// Open the TCP socket, negotiate a protocol version, and spawn the
    /// reader/keepalive tasks. Mirrors `LocalChannel.connect` + `hello` in
    /// the Python reference, collapsed into one call.
    pub async fn connect(&self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.host, self.config.port)
            .parse()
            .map_err(|e| Error::ProtocolError(format!("invalid host {}: {e}", self.host)))?;
        let stream = TcpStream::connect(addr).await?;
        let (reader, writer) = stream.into_split();

        let first = self.preferred_version.unwrap_or(ProtocolVersion::V1_0);
        let second = if first == ProtocolVersion::V1_0 { ProtocolVersion::L01 } else { ProtocolVersion::V1_0 };

        {
            let mut state = self.state.lock().await;
            *state = Some(ConnectionState {
                writer,
                codec: FrameCodec::new(self.local_key.clone()),
                version: first,
                connect_nonce: rand::rng().random_range(10_000..=32_767),
            });
        }

        let decoder = Arc::new(AsyncMutex::new(FrameDecoder::new(FrameCodec::new(self.local_key.clone()))));
        self.spawn_reader(reader, Arc::clone(&decoder));

        if !self.try_hello(first, Arc::clone(&decoder)).await? {
            if !self.try_hello(second, Arc::clone(&decoder)).await? {
                self.teardown().await;
                return Err(Error::ProtocolError("device did not speak any known local protocol".into()));
            }
        }

        self.spawn_keepalive(self.config.keepalive_interval);
        Ok(())
    }

    async fn try_hello(&self, version: ProtocolVersion, decoder: Arc<AsyncMutex<FrameDecoder>>) -> Result<bool> {
        debug!(host = %self.host, ?version, "attempting local handshake");
        let (connect_nonce, sequence) = {
            let mut state = self.state.lock().await;
            let state = state.as_mut().ok_or_else(|| Error::Disconnected("not connected".into()))?;
            state.version = version;
            state.codec = FrameCodec::new(self.local_key.clone());
            (state.connect_nonce, 1u32)
        };
        *decoder.lock().await.codec_mut() = FrameCodec::new(self.local_key.clone());

        let request = Frame::control(protocol_tag::HELLO_REQUEST, version, sequence, connect_nonce as u32, 0);
        match self
            .waiters
            .send(request, protocol_tag::HELLO_RESPONSE, self.config.hello_timeout, |frame| self.write_frame(frame))
            .await
        {
            Ok(response) => {
                let ack_nonce = response.random as u16;
                let mut state = self.state.lock().await;
                let state = state.as_mut().ok_or_else(|| Error::Disconnected("not connected".into()))?;
                if version == ProtocolVersion::L01 {
                    state.codec.establish_l01(connect_nonce, ack_nonce);
                    decoder.lock().await.codec_mut().establish_l01(connect_nonce, ack_nonce);
                }
                debug!(host = %self.host, ?version, "local handshake succeeded");
                Ok(true)
            },
            Err(Error::Timeout) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn write_frame(&self, frame: Frame) -> Result<()> {
        let mut state = self.state.lock().await;
        let state = state.as_mut().ok_or_else(|| Error::Disconnected("not connected".into()))?;
        let bytes = state.codec.encode(&frame).map_err(|e| Error::ProtocolError(e.to_string()))?;
        state.writer.write_all(&bytes).await?;
        Ok(())
    }

    /// Publish a frame without awaiting a response (spec.md §4.5
    /// fire-and-forget outbound).
    pub async fn publish(&self, mut frame: Frame) -> Result<()> {
        frame.sequence = rand::rng().random();
        {
            let state = self.state.lock().await;
            let state = state.as_ref().ok_or_else(|| Error::Disconnected("not connected".into()))?;
            frame.version = state.version;
        }
        self.write_frame(frame).await
    }

    /// Send a request and await the matching response (spec.md §3
    /// "PendingRequest").
    pub async fn send_request(&self, mut frame: Frame, response_protocol: u16) -> Result<Frame> {
        frame.sequence = rand::rng().random();
        {
            let state = self.state.lock().await;
            let state = state.as_ref().ok_or_else(|| Error::Disconnected("not connected".into()))?;
            frame.version = state.version;
        }
        self.waiters
            .send(frame, response_protocol, self.config.request_timeout, |frame| self.write_frame(frame))
            .await
    }

    fn spawn_reader(&self, reader: tokio::net::tcp::OwnedReadHalf, decoder: Arc<AsyncMutex<FrameDecoder>>) {
        let subscribers = Arc::clone(&self.subscribers);
        let waiters = Arc::clone(&self.waiters);
        let state = Arc::clone(&self.state);
        let host = self.host.clone();
        tokio::spawn(async move {
            let mut reader = reader;
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        let frames = decoder.lock().await.feed(&buf[..n]);
                        for result in frames {
                            match result {
                                Ok(frame) => {
                                    waiters.complete(&frame);
                                    subscribers.dispatch(&frame);
                                },
                                Err(e) => warn!(host = %host, error = %e, "dropping undecodable local frame"),
                            }
                        }
                    },
                    Err(e) => {
                        warn!(host = %host, error = %e, "local socket read error");
                        break;
                    },
                }
            }
            debug!(host = %host, "local connection lost");
            *state.lock().await = None;
            waiters.fail_all_disconnected();
        });
    }

    fn spawn_keepalive(&self, interval: Duration) {
        let state = Arc::clone(&self.state);
        let waiters = Arc::clone(&self.waiters);
        let host = self.host.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let frame = {
                    let mut guard = state.lock().await;
                    let Some(conn) = guard.as_mut() else { break };
                    let frame = Frame::control(protocol_tag::PING_REQUEST, conn.version, rand::rng().random(), 0, 0);
                    match conn.codec.encode(&frame) {
                        Ok(bytes) => Some((conn, bytes)),
                        Err(e) => {
                            warn!(host = %host, error = %e, "failed to encode keepalive ping");
                            None
                        },
                    }
                    .map(|(_, bytes)| bytes)
                };
                let Some(bytes) = frame else { continue };
                let mut guard = state.lock().await;
                let Some(conn) = guard.as_mut() else { break };
                if let Err(e) = conn.writer.write_all(&bytes).await {
                    warn!(host = %host, error = %e, "keepalive ping failed");
                    waiters.fail_all_disconnected();
                    *guard = None;
                    break;
                }
            }
        });
    }

    async fn teardown(&self) {
        *self.state.lock().await = None;
        self.waiters.fail_all_disconnected();
    }

    pub async fn close(&self) {
        self.teardown().await;
    }
}

