//! Wire types, codec and error taxonomy for the noex client
//!
//! This crate holds everything that does not need a socket:
//!
//! - **Types**: the classified shapes of incoming frames ([`IncomingMessage`],
//!   [`WelcomeInfo`], [`PushMessage`], ...)
//! - **Codec**: request encoding with the `{id, type, ...payload}` layout,
//!   frame decoding and the heartbeat reply
//! - **Error handling**: the [`Error`] enum shared by every noex crate
//! - **Observability**: OpenTelemetry and `tracing-subscriber` bootstrap
//!
//! The `noex-client` crate builds the WebSocket transport and the request,
//! push and subscription machinery on top of it.
//!
//! # Example
//!
//! ```rust
//! use noex_core::{codec, IncomingMessage, ResponseBody};
//! use serde_json::json;
//!
//! let frame = codec::encode_request(1, "store.count", &json!({"bucket": "tasks"})).unwrap();
//! assert!(frame.contains("\"id\":1"));
//!
//! let reply = codec::decode(r#"{"id":1,"type":"result","data":3}"#).unwrap();
//! assert_eq!(
//!     reply,
//!     IncomingMessage::Response { id: 1, body: ResponseBody::Result(json!(3)) }
//! );
//! ```

pub mod codec;
pub mod error;
pub mod observability;
pub mod types;

pub use error::{Error, Result, ServerErrorData};
pub use observability::{init_observability, shutdown_observability, ObservabilityConfig};
pub use types::{IncomingMessage, PushMessage, ResponseBody, SystemMessage, WelcomeInfo};
