//! Wire types for the noex protocol
//!
//! The server speaks JSON over a single WebSocket. Every frame is an object
//! with a `type` discriminator; replies to client requests additionally carry
//! the integer `id` the client allocated for the request.
//!
//! Incoming frames are classified once, by [`IncomingMessage::from_value`],
//! into the shapes the client reacts to:
//!
//! | frame                                    | variant                        |
//! |------------------------------------------|--------------------------------|
//! | `{"type":"welcome",...}`                 | [`IncomingMessage::Welcome`]   |
//! | `{"type":"ping","timestamp":n}`          | [`IncomingMessage::Ping`]      |
//! | `{"type":"push","subscriptionId":s,...}` | [`IncomingMessage::Push`]      |
//! | `{"type":"system",...}`                  | [`IncomingMessage::System`]    |
//! | anything else with an integer `id`       | [`IncomingMessage::Response`]  |
//! | the rest                                 | [`IncomingMessage::Unknown`]   |
//!
//! Malformed frames of a known kind (a `push` without a string `channel`, a
//! `ping` without a numeric `timestamp`) fall through to `Unknown` so that
//! the routers downstream never see a half-valid message.

use crate::error::ServerErrorData;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

/// Server handshake sent as the first frame of every connection
///
/// Missing fields default to `""`, `0` and `false`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WelcomeInfo {
    /// Server version string
    pub version: String,
    /// Server clock at handshake time (milliseconds since the epoch)
    pub server_time: i64,
    /// Whether the session has to authenticate before using the API
    pub requires_auth: bool,
}

impl WelcomeInfo {
    fn from_object(obj: &Map<String, Value>) -> Self {
        let server_time = match obj.get("serverTime") {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(0),
            _ => 0,
        };

        Self {
            version: obj
                .get("version")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            server_time,
            requires_auth: obj
                .get("requiresAuth")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }
    }
}

/// A server-initiated subscription update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushMessage {
    /// Server-assigned subscription identifier
    pub subscription_id: String,
    /// Channel discriminator (`subscription`, `event`, ...)
    pub channel: String,
    /// Payload, `null` when the frame carried none
    #[serde(default)]
    pub data: Value,
}

/// A server-initiated control message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemMessage {
    /// Event name, for example `session_revoked`
    pub event: Option<String>,
    /// Human-readable reason, only kept when it is a string
    pub reason: Option<String>,
}

/// Outcome carried by a reply to a client request
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseBody {
    /// `type: "result"`; holds `data`, or `null` when absent
    Result(Value),
    /// `type: "error"`
    Error(ServerErrorData),
    /// Any other `type`; holds the type string (empty when missing)
    Unexpected(String),
}

/// A classified incoming frame
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingMessage {
    /// Connection handshake
    Welcome(WelcomeInfo),
    /// Heartbeat probe; the timestamp is echoed back verbatim
    Ping { timestamp: Number },
    /// Subscription update
    Push(PushMessage),
    /// Server control message
    System(SystemMessage),
    /// Reply correlated to a pending request by `id`
    Response { id: u64, body: ResponseBody },
    /// Anything the client does not react to
    Unknown(Value),
}

impl IncomingMessage {
    /// Classify a parsed JSON frame
    pub fn from_value(value: Value) -> Self {
        let obj = match value.as_object() {
            Some(obj) => obj,
            None => return IncomingMessage::Unknown(value),
        };

        let msg_type = obj.get("type").and_then(Value::as_str);

        match msg_type {
            Some("welcome") => return IncomingMessage::Welcome(WelcomeInfo::from_object(obj)),
            Some("ping") => {
                return match obj.get("timestamp") {
                    Some(Value::Number(n)) => IncomingMessage::Ping {
                        timestamp: n.clone(),
                    },
                    _ => IncomingMessage::Unknown(value),
                };
            }
            Some("push") => {
                let subscription_id = obj.get("subscriptionId").and_then(Value::as_str);
                let channel = obj.get("channel").and_then(Value::as_str);
                return match (subscription_id, channel) {
                    (Some(subscription_id), Some(channel)) => {
                        IncomingMessage::Push(PushMessage {
                            subscription_id: subscription_id.to_string(),
                            channel: channel.to_string(),
                            data: obj.get("data").cloned().unwrap_or(Value::Null),
                        })
                    }
                    _ => IncomingMessage::Unknown(value),
                };
            }
            Some("system") => {
                return IncomingMessage::System(SystemMessage {
                    event: obj.get("event").and_then(Value::as_str).map(str::to_string),
                    reason: obj.get("reason").and_then(Value::as_str).map(str::to_string),
                });
            }
            _ => {}
        }

        let id = match obj.get("id").and_then(Value::as_u64) {
            Some(id) => id,
            None => return IncomingMessage::Unknown(value),
        };

        let body = match msg_type {
            Some("result") => ResponseBody::Result(obj.get("data").cloned().unwrap_or(Value::Null)),
            Some("error") => ResponseBody::Error(ServerErrorData {
                code: obj
                    .get("code")
                    .and_then(Value::as_str)
                    .unwrap_or(ServerErrorData::UNKNOWN_CODE)
                    .to_string(),
                message: obj
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or(ServerErrorData::UNKNOWN_MESSAGE)
                    .to_string(),
                details: obj.get("details").cloned(),
            }),
            other => ResponseBody::Unexpected(other.unwrap_or_default().to_string()),
        };

        IncomingMessage::Response { id, body }
    }

    /// Short kind name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            IncomingMessage::Welcome(_) => "welcome",
            IncomingMessage::Ping { .. } => "ping",
            IncomingMessage::Push(_) => "push",
            IncomingMessage::System(_) => "system",
            IncomingMessage::Response { .. } => "response",
            IncomingMessage::Unknown(_) => "unknown",
        }
    }

    /// Correlation ID, when this is a reply
    pub fn id(&self) -> Option<u64> {
        match self {
            IncomingMessage::Response { id, .. } => Some(*id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_welcome_with_defaults() {
        let msg = IncomingMessage::from_value(json!({"type": "welcome"}));
        assert_eq!(msg, IncomingMessage::Welcome(WelcomeInfo::default()));

        let msg = IncomingMessage::from_value(json!({
            "type": "welcome",
            "version": "1.2.0",
            "serverTime": 1700000000000i64,
            "requiresAuth": true
        }));
        match msg {
            IncomingMessage::Welcome(info) => {
                assert_eq!(info.version, "1.2.0");
                assert_eq!(info.server_time, 1_700_000_000_000);
                assert!(info.requires_auth);
            }
            other => panic!("Expected welcome, got {:?}", other),
        }
    }

    #[test]
    fn test_ping_requires_numeric_timestamp() {
        let msg = IncomingMessage::from_value(json!({"type": "ping", "timestamp": 42}));
        assert!(matches!(msg, IncomingMessage::Ping { .. }));

        let msg = IncomingMessage::from_value(json!({"type": "ping", "timestamp": "42"}));
        assert!(matches!(msg, IncomingMessage::Unknown(_)));
    }

    #[test]
    fn test_push_shape_validation() {
        let msg = IncomingMessage::from_value(json!({
            "type": "push",
            "subscriptionId": "sub-1",
            "channel": "subscription",
            "data": [1, 2]
        }));
        match msg {
            IncomingMessage::Push(push) => {
                assert_eq!(push.subscription_id, "sub-1");
                assert_eq!(push.channel, "subscription");
                assert_eq!(push.data, json!([1, 2]));
            }
            other => panic!("Expected push, got {:?}", other),
        }

        let missing_channel = IncomingMessage::from_value(json!({
            "type": "push",
            "subscriptionId": "sub-1"
        }));
        assert!(matches!(missing_channel, IncomingMessage::Unknown(_)));

        let numeric_id = IncomingMessage::from_value(json!({
            "type": "push",
            "subscriptionId": 7,
            "channel": "event"
        }));
        assert!(matches!(numeric_id, IncomingMessage::Unknown(_)));
    }

    #[test]
    fn test_push_without_data_is_null() {
        let msg = IncomingMessage::from_value(json!({
            "type": "push",
            "subscriptionId": "s",
            "channel": "event"
        }));
        match msg {
            IncomingMessage::Push(push) => assert_eq!(push.data, Value::Null),
            other => panic!("Expected push, got {:?}", other),
        }
    }

    #[test]
    fn test_system_message_reason_must_be_string() {
        let msg = IncomingMessage::from_value(json!({
            "type": "system",
            "event": "session_revoked",
            "reason": 12
        }));
        assert_eq!(
            msg,
            IncomingMessage::System(SystemMessage {
                event: Some("session_revoked".into()),
                reason: None,
            })
        );
    }

    #[test]
    fn test_result_response() {
        let msg = IncomingMessage::from_value(json!({"id": 3, "type": "result", "data": {"ok": true}}));
        assert_eq!(msg.id(), Some(3));
        assert_eq!(
            msg,
            IncomingMessage::Response {
                id: 3,
                body: ResponseBody::Result(json!({"ok": true})),
            }
        );

        let no_data = IncomingMessage::from_value(json!({"id": 4, "type": "result"}));
        assert_eq!(
            no_data,
            IncomingMessage::Response {
                id: 4,
                body: ResponseBody::Result(Value::Null),
            }
        );
    }

    #[test]
    fn test_error_response_defaults() {
        let msg = IncomingMessage::from_value(json!({"id": 9, "type": "error"}));
        match msg {
            IncomingMessage::Response {
                body: ResponseBody::Error(err),
                ..
            } => {
                assert_eq!(err.code, "UNKNOWN");
                assert_eq!(err.message, "Unknown server error");
                assert!(err.details.is_none());
            }
            other => panic!("Expected error response, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_response_kind() {
        let msg = IncomingMessage::from_value(json!({"id": 1, "type": "bogus"}));
        assert_eq!(
            msg,
            IncomingMessage::Response {
                id: 1,
                body: ResponseBody::Unexpected("bogus".into()),
            }
        );
    }

    #[test]
    fn test_non_integer_id_is_unknown() {
        for value in [
            json!({"id": "1", "type": "result"}),
            json!({"id": 1.5, "type": "result"}),
            json!({"type": "result"}),
            json!([1, 2, 3]),
            json!("text"),
        ] {
            let msg = IncomingMessage::from_value(value);
            assert_eq!(msg.kind(), "unknown");
        }
    }

    #[test]
    fn test_welcome_serializes_camel_case() {
        let info = WelcomeInfo {
            version: "1".into(),
            server_time: 5,
            requires_auth: true,
        };
        let value = serde_json::to_value(&info).unwrap();
        assert_eq!(value["serverTime"], 5);
        assert_eq!(value["requiresAuth"], true);
    }
}
