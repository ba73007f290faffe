//! The JSON `dps` envelope carried inside V1 frame payloads (spec.md §4.1,
//! §4.4): `{"dps":{"101":"<stringified {id,method,params}>"},"t":<unix>}`,
//! with responses mirroring under key "102".

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

pub const REQUEST_DP: &str = "101";
pub const RESPONSE_DP: &str = "102";

#[derive(Debug, Serialize)]
struct RpcRequestBody<'a> {
    id: u32,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct RpcResponseBody {
    id: u32,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    #[serde(default)]
    code: i32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct DpsEnvelope {
    dps: std::collections::HashMap<String, Value>,
}

/// Build the `dps`-wrapped payload bytes for an outbound V1 RPC request.
pub fn encode_request(request_id: u32, method: &str, params: Value, unix_seconds: u32) -> Vec<u8> {
    let body = RpcRequestBody { id: request_id, method, params };
    let stringified = serde_json::to_string(&body).expect("RpcRequestBody always serializes");
    let envelope = serde_json::json!({
        "dps": { REQUEST_DP: stringified },
        "t": unix_seconds,
    });
    serde_json::to_vec(&envelope).expect("envelope always serializes")
}

/// Parse an inbound V1 RPC response payload and extract `result`, matching
/// it against `expected_id` (spec.md §7 "CommandError").
pub fn decode_response(payload: &[u8], method: &str, expected_id: u32) -> Result<Value> {
    let envelope: DpsEnvelope = serde_json::from_slice(payload).map_err(|e| Error::ProtocolError(format!("malformed dps envelope: {e}")))?;
    let raw = envelope
        .dps
        .get(RESPONSE_DP)
        .ok_or_else(|| Error::ProtocolError("response missing dp 102".into()))?;
    let stringified = raw.as_str().ok_or_else(|| Error::ProtocolError("dp 102 is not a JSON string".into()))?;
    let body: RpcResponseBody =
        serde_json::from_str(stringified).map_err(|e| Error::ProtocolError(format!("malformed rpc response body: {e}")))?;

    if body.id != expected_id {
        return Err(Error::ProtocolError(format!("response id {} does not match request id {}", body.id, expected_id)));
    }
    if let Some(err) = body.error {
        return Err(Error::CommandError {
            method: method.to_string(),
            code: err.code,
            message: err.message,
        });
    }
    body.result.ok_or_else(|| Error::ProtocolError("response has neither result nor error".into()))
}
