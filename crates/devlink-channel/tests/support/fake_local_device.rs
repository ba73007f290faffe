//! A bare-TCP stand-in for a real device's local listener, speaking the
//! same wire framing `devlink_wire` encodes/decodes, used to drive
//! `V1Channel`'s local leg end to end without a real robot on the network
//! (spec.md §0.4's "fake local-channel TCP server").

use devlink_wire::{Frame, FrameCodec, FrameDecoder, ProtocolVersion, protocol_tag};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use super::{TEST_LOCAL_KEY, decode_rpc_request, encode_rpc_response};

/// What the fake device does with a HELLO attempt for a given version:
/// accept it and ack with `ack_nonce`, or stay silent (forcing the caller
/// to retry with the other version, or time out).
pub enum HelloBehavior {
    Accept { ack_nonce: u16 },
    Ignore,
}

pub struct FakeLocalDevice {
    pub port: u16,
}

impl FakeLocalDevice {
    /// Bind an ephemeral port and serve one connection's worth of protocol:
    /// `hello_behavior(version)` decides each HELLO attempt, `respond`
    /// decides each RPC request's result (`None` drops the request,
    /// simulating an unresponsive device).
    pub async fn start<H, R>(hello_behavior: H, respond: R) -> Self
    where
        H: Fn(ProtocolVersion) -> HelloBehavior + Send + 'static,
        R: Fn(&str, serde_json::Value) -> Option<serde_json::Value> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fake local device");
        let port = listener.local_addr().expect("local_addr").port();
        tokio::spawn(run(listener, hello_behavior, respond));
        Self { port }
    }
}

async fn run<H, R>(listener: TcpListener, hello_behavior: H, respond: R)
where
    H: Fn(ProtocolVersion) -> HelloBehavior,
    R: Fn(&str, serde_json::Value) -> Option<serde_json::Value>,
{
    let Ok((stream, _)) = listener.accept().await else { return };
    let (mut reader, mut writer) = stream.into_split();

    let mut codec = FrameCodec::new(TEST_LOCAL_KEY.to_vec());
    let mut decoder = FrameDecoder::new(FrameCodec::new(TEST_LOCAL_KEY.to_vec()));
    let mut buf = [0u8; 4096];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };

        for result in decoder.feed(&buf[..n]) {
            let Ok(frame) = result else { continue };
            match frame.protocol {
                protocol_tag::HELLO_REQUEST => {
                    let HelloBehavior::Accept { ack_nonce } = hello_behavior(frame.version) else { continue };
                    if frame.version == ProtocolVersion::L01 {
                        let connect_nonce = frame.random as u16;
                        codec.establish_l01(connect_nonce, ack_nonce);
                        *decoder.codec_mut() = codec.clone();
                    }
                    let response = Frame::control(protocol_tag::HELLO_RESPONSE, frame.version, frame.sequence, ack_nonce as u32, 0);
                    let bytes = codec.encode(&response).expect("encode hello response");
                    if writer.write_all(&bytes).await.is_err() {
                        return;
                    }
                },
                protocol_tag::PING_REQUEST => {
                    let response = Frame::control(protocol_tag::PING_RESPONSE, frame.version, frame.sequence, 0, 0);
                    let bytes = codec.encode(&response).expect("encode ping response");
                    if writer.write_all(&bytes).await.is_err() {
                        return;
                    }
                },
                protocol_tag::RPC_REQUEST => {
                    let (id, method, params) = decode_rpc_request(&frame.payload);
                    let Some(result) = respond(&method, params) else { continue };
                    let response = Frame {
                        protocol: protocol_tag::RPC_RESPONSE,
                        sequence: frame.sequence,
                        random: 0,
                        timestamp: frame.timestamp,
                        version: frame.version,
                        payload: encode_rpc_response(id, result),
                    };
                    let bytes = codec.encode(&response).expect("encode rpc response");
                    if writer.write_all(&bytes).await.is_err() {
                        return;
                    }
                },
                _ => {},
            }
        }
    }
}
