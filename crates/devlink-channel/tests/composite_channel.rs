//! End-to-end scenarios for `V1Channel`'s local-preferred/cloud-fallback
//! failover, driven against bare-TCP/MQTT device stand-ins rather than a
//! real robot (spec.md §8).

mod support;

use std::{collections::HashSet, sync::Arc, time::Duration};

use devlink_channel::{V1Channel, V1ChannelConfig};
use devlink_transport::{LocalChannelConfig, MqttChannel, Session};
use devlink_wire::{Frame, FrameCodec, FrameDecoder, ProtocolVersion, protocol_tag};
use serde_json::json;
use support::{
    TEST_LOCAL_KEY, decode_rpc_request, encode_rpc_response,
    fake_broker::FakeBroker,
    fake_local_device::{FakeLocalDevice, HelloBehavior},
};

const REPORT_TOPIC: &str = "rr/m/o/u/c/d1";
const PUBLISH_TOPIC: &str = "rr/m/i/u/c/d1";

/// Answers every inbound MQTT RPC on `PUBLISH_TOPIC`, publishing the result
/// back on `REPORT_TOPIC`. `get_network_info` returns `device_ip`; anything
/// else gets a generic success so scenario 2's mqtt fallback has something
/// to land on.
fn spawn_mqtt_responder(broker: &FakeBroker, mut inbound: tokio::sync::mpsc::UnboundedReceiver<support::fake_broker::InboundPublish>, device_ip: String) {
    let outbound = broker.outbound_tx.clone();
    tokio::spawn(async move {
        let codec = FrameCodec::new(TEST_LOCAL_KEY.to_vec());
        while let Some(message) = inbound.recv().await {
            if message.topic != PUBLISH_TOPIC {
                continue;
            }
            let mut decoder = FrameDecoder::new(codec.clone());
            let Some(Ok(frame)) = decoder.feed(&message.payload).into_iter().next() else { continue };
            let (id, method, params) = decode_rpc_request(&frame.payload);
            let result = if method == "get_network_info" {
                json!({"ip": device_ip, "ssid": "", "bssid": "", "mac": ""})
            } else {
                let _ = params;
                json!({"ok": true, "via": "mqtt"})
            };

            let response = Frame {
                protocol: protocol_tag::RPC_RESPONSE,
                sequence: frame.sequence,
                random: 0,
                timestamp: frame.timestamp,
                version: ProtocolVersion::V1_0,
                payload: encode_rpc_response(id, result),
            };
            let bytes = codec.encode(&response).expect("encode mqtt rpc response");
            let _ = outbound.send((REPORT_TOPIC.to_string(), bytes));
        }
    });
}

/// Bring up a fake broker plus a `V1Channel` connected to it, with the
/// broker answering `get_network_info` with `device_ip` and a short local
/// config so failed local attempts don't stall the test.
async fn connected_channel(device_ip: &str, local_port: u16, network_info_ttl: Duration) -> (Arc<V1Channel>, FakeBroker) {
    let (broker, inbound) = FakeBroker::start().await;
    spawn_mqtt_responder(&broker, inbound, device_ip.to_string());

    let mut options = rumqttc::MqttOptions::new("devlink-test", "127.0.0.1", broker.port);
    options.set_keep_alive(Duration::from_secs(60));
    let session = Session::connect(options);
    session.wait_ready().await;

    let mqtt = Arc::new(MqttChannel::new(session, REPORT_TOPIC, PUBLISH_TOPIC, TEST_LOCAL_KEY.to_vec(), Duration::from_millis(500)));
    let config = V1ChannelConfig {
        local: LocalChannelConfig {
            port: local_port,
            hello_timeout: Duration::from_millis(150),
            request_timeout: Duration::from_millis(150),
            keepalive_interval: Duration::from_secs(60),
        },
        network_info_ttl,
    };
    let channel = V1Channel::new(mqtt, TEST_LOCAL_KEY.to_vec(), HashSet::new(), config);
    (channel, broker)
}

/// Scenario 1 (spec.md §8): the happy path sends the RPC over the local
/// leg once the device's IP has been resolved over mqtt.
#[tokio::test]
async fn scenario_1_happy_path_rpc_goes_over_the_local_leg() {
    let device = FakeLocalDevice::start(
        |_version| HelloBehavior::Accept { ack_nonce: 4242 },
        |method, _params| {
            assert_eq!(method, "get_status");
            Some(json!({"state": "charging"}))
        },
    )
    .await;

    let (channel, _broker) = connected_channel("127.0.0.1", device.port, Duration::from_secs(3600)).await;

    let result = channel.send_command("get_status", json!([])).await.unwrap();
    assert_eq!(result["state"], "charging");
    assert!(channel.is_local_connected().await);
    assert!(channel.is_mqtt_connected());
}

/// Scenario 2 (spec.md §8): a local leg that handshakes but never answers
/// the RPC times out, and the command falls back to mqtt; the failed local
/// leg is dropped so `is_local_connected` flips false.
#[tokio::test]
async fn scenario_2_unresponsive_local_leg_falls_back_to_mqtt() {
    let device = FakeLocalDevice::start(|_version| HelloBehavior::Accept { ack_nonce: 1 }, |_method, _params| None).await;

    let (channel, _broker) = connected_channel("127.0.0.1", device.port, Duration::from_secs(3600)).await;

    let result = channel.send_command("get_status", json!([])).await.unwrap();
    assert_eq!(result["via"], "mqtt");
    assert!(!channel.is_local_connected().await, "a transient local failure must drop the cached local leg");
}

/// Scenario 3 (spec.md §8): a device that ignores the legacy HELLO forces
/// negotiation onto "L01"; `ack_nonce` round-trips through the CBC key
/// derivation correctly.
#[tokio::test]
async fn scenario_3_local_negotiates_l01_when_legacy_hello_is_ignored() {
    let device = FakeLocalDevice::start(
        |version| match version {
            ProtocolVersion::V1_0 => HelloBehavior::Ignore,
            ProtocolVersion::L01 => HelloBehavior::Accept { ack_nonce: 54321 },
        },
        |method, _params| {
            assert_eq!(method, "get_status");
            Some(json!({"state": "docked"}))
        },
    )
    .await;

    let (channel, _broker) = connected_channel("127.0.0.1", device.port, Duration::from_secs(3600)).await;

    let result = channel.send_command("get_status", json!([])).await.unwrap();
    assert_eq!(result["state"], "docked");
    assert!(channel.is_local_connected().await);
}
