//! Codec for noex frames
//!
//! Thin layer over `serde_json` that knows the shape of the noex protocol:
//!
//! - **Outgoing**: requests are flat objects, `{"id": n, "type": "ns.verb",
//!   ...payload}`. The payload's own keys are merged into the frame and the
//!   `id` and `type` keys always win over same-named payload keys.
//! - **Incoming**: frames are parsed once and classified into an
//!   [`IncomingMessage`].
//! - **Heartbeat**: `ping` frames are answered with a `pong` echoing the
//!   timestamp, without going through the classification path.
//!
//! # Examples
//!
//! ```rust
//! use noex_core::{codec, IncomingMessage};
//! use serde_json::json;
//!
//! let frame = codec::encode_request(1, "store.get", &json!({"bucket": "users", "key": "a"})).unwrap();
//! assert!(frame.contains("\"type\":\"store.get\""));
//!
//! let msg = codec::decode(r#"{"id":1,"type":"result","data":null}"#).unwrap();
//! assert_eq!(msg.id(), Some(1));
//! ```

use crate::error::{Error, Result};
use crate::types::IncomingMessage;
use serde::Serialize;
use serde_json::{json, Map, Number, Value};

/// Encode any serializable value to a JSON string
pub fn encode<T: Serialize>(msg: &T) -> Result<String> {
    serde_json::to_string(msg).map_err(|e| Error::Serialization(e.to_string()))
}

/// Build the JSON object for a request frame
///
/// `payload` must be a JSON object or `null`; anything else is rejected with
/// `Error::InvalidRequest`.
pub fn request_frame(id: u64, msg_type: &str, payload: &Value) -> Result<Map<String, Value>> {
    let mut frame = match payload {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(Error::InvalidRequest(format!(
                "Payload for {} must be a JSON object, got {}",
                msg_type,
                value_kind(other)
            )))
        }
    };

    // Inserted after the payload so a payload `id`/`type` can never shadow them
    frame.insert("id".to_string(), Value::from(id));
    frame.insert("type".to_string(), Value::from(msg_type));

    Ok(frame)
}

/// Encode a request frame to a JSON string
pub fn encode_request(id: u64, msg_type: &str, payload: &Value) -> Result<String> {
    let frame = request_frame(id, msg_type, payload)?;
    encode(&frame)
}

/// Encode a heartbeat reply
pub fn encode_pong(timestamp: &Number) -> String {
    json!({"type": "pong", "timestamp": timestamp}).to_string()
}

/// Decode and classify an incoming frame
///
/// # Errors
///
/// Returns `Error::Serialization` if the text is not valid JSON. Valid JSON of
/// an unrecognised shape decodes to `IncomingMessage::Unknown`.
pub fn decode(data: &str) -> Result<IncomingMessage> {
    let value: Value =
        serde_json::from_str(data).map_err(|e| Error::Serialization(e.to_string()))?;
    Ok(IncomingMessage::from_value(value))
}

/// Return the timestamp of a heartbeat `ping` frame
///
/// `None` for anything that is not `{"type":"ping","timestamp":<number>}`,
/// including invalid JSON.
pub fn heartbeat_timestamp(data: &str) -> Option<Number> {
    // Cheap pre-filter; most frames are not pings
    if !data.contains("\"ping\"") {
        return None;
    }

    match decode(data).ok()? {
        IncomingMessage::Ping { timestamp } => Some(timestamp),
        _ => None,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
