//! Shared test-only doubles for devices and the cloud bus, used by the
//! `composite_channel` end-to-end scenarios (spec.md §0.4, §8).

pub mod fake_broker;
pub mod fake_local_device;

/// 16-byte local key shared by every fake peer in these tests.
pub const TEST_LOCAL_KEY: &[u8; 16] = b"0123456789abcdef";

/// Parse a decrypted V1 RPC request payload's `dps` envelope into
/// `(id, method, params)` (spec.md §4.1, §6), mirroring what
/// `devlink_channel::envelope::decode_response` expects on the way back.
pub fn decode_rpc_request(payload: &[u8]) -> (u32, String, serde_json::Value) {
    let envelope: serde_json::Value = serde_json::from_slice(payload).expect("valid dps envelope");
    let stringified = envelope["dps"]["101"].as_str().expect("dp 101 present");
    let body: serde_json::Value = serde_json::from_str(stringified).expect("valid rpc request body");
    (
        body["id"].as_u64().expect("id present") as u32,
        body["method"].as_str().expect("method present").to_string(),
        body["params"].clone(),
    )
}

/// Build the `dps`-wrapped payload bytes for a V1 RPC response.
pub fn encode_rpc_response(id: u32, result: serde_json::Value) -> Vec<u8> {
    let body = serde_json::json!({"id": id, "result": result});
    let envelope = serde_json::json!({"dps": {"102": body.to_string()}});
    serde_json::to_vec(&envelope).expect("envelope always serializes")
}
