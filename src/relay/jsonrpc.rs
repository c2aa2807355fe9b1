//! The little JSON-RPC the relay needs to know.
//!
//! Messages are validated as JSON and otherwise passed through untouched.
//! The only semantic peek is at `id`, to address synthetic error replies.

use bytes::Bytes;
use serde::de::IgnoredAny;
use serde::Deserialize;
use serde_json::{json, Value};

/// JSON-RPC "server error" code used for relay-generated failures.
pub const RELAY_ERROR_CODE: i64 = -32000;

#[derive(Deserialize)]
struct IdOnly {
    #[serde(default)]
    id: Value,
}

/// Whether `line` is one syntactically valid JSON document.
pub fn is_valid(line: &[u8]) -> bool {
    serde_json::from_slice::<IgnoredAny>(line).is_ok()
}

/// The request `id`, or `null` when absent or unreadable.
pub fn extract_id(line: &[u8]) -> Value {
    serde_json::from_slice::<IdOnly>(line)
        .map(|parsed| parsed.id)
        .unwrap_or(Value::Null)
}

/// Error response answering the request in `line`.
pub fn error_response(line: &[u8], message: &str) -> Vec<u8> {
    let response = json!({
        "jsonrpc": "2.0",
        "id": extract_id(line),
        "error": {
            "code": RELAY_ERROR_CODE,
            "message": message,
        },
    });
    response.to_string().into_bytes()
}

/// Prepare a payload from the peer for line-delimited output: `None` if it
/// is not valid JSON, otherwise the payload with raw CR/LF turned into
/// spaces.
pub fn to_single_line(payload: &[u8]) -> Option<Bytes> {
    if !is_valid(payload) {
        return None;
    }
    if !payload.iter().any(|&b| b == b'\n' || b == b'\r') {
        return Some(Bytes::copy_from_slice(payload));
    }
    let flattened: Vec<u8> = payload
        .iter()
        .map(|&b| if b == b'\n' || b == b'\r' { b' ' } else { b })
        .collect();
    Some(Bytes::from(flattened))
}
