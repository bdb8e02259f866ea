//! Client for noex-server over WebSocket
//!
//! One persistent WebSocket carries every request, every live subscription
//! and the authentication state of a session.
//!
//! # Core Features
//!
//! - **Request-Response**: correlated by integer ID, many in flight at once,
//!   each with its own timeout
//! - **Subscriptions**: store queries and rules events pushed by the server,
//!   restored under new IDs after a reconnect
//! - **Auto-Reconnection**: exponential backoff with jitter, cancellable by
//!   `disconnect()`, never for non-retryable close codes
//! - **Auto-Login**: re-authenticates when the server's welcome asks for it
//! - **Events**: `Connected`, `Reconnecting`, `Disconnected`, ... listeners
//! - **Observability**: `tracing` spans and OpenTelemetry metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use noex_client::{ClientEvent, EventKind, NoexClient};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = NoexClient::connect_to("ws://localhost:8080").await?;
//!
//!     client.on(EventKind::Disconnected, |event| {
//!         if let ClientEvent::Disconnected { reason } = event {
//!             eprintln!("disconnected: {}", reason);
//!         }
//!     });
//!
//!     // Raw request
//!     let count = client.request("store.count", json!({"bucket": "users"})).await?;
//!     println!("users: {}", count);
//!
//!     // Domain API with a live query
//!     client.store().bucket("users").insert(json!({"name": "Alice"})).await?;
//!     let handle = client
//!         .store()
//!         .subscribe("all-users", None, |users| println!("users now: {}", users))
//!         .await?;
//!
//!     handle.unsubscribe();
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```
//!
//! # With Reconnection Tuning
//!
//! ```rust,no_run
//! use noex_client::{ClientBuilder, ExponentialBackoff};
//! use std::time::Duration;
//!
//! # async fn example() -> noex_core::Result<()> {
//! let client = ClientBuilder::new("ws://localhost:8080")
//!     .with_reconnect_strategy(
//!         ExponentialBackoff::new(Duration::from_millis(100), Duration::from_secs(30))
//!             .with_max_attempts(10)
//!             .with_jitter(Duration::from_millis(250)),
//!     )
//!     .connect()
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
mod client;
mod client_builder;
mod config;
mod connection_state;
mod events;
mod guard;
mod metrics;
mod push_router;
mod reconnect;
mod request;
mod subscription;
mod transport;

pub use api::{AuthApi, BucketApi, ProceduresApi, RulesApi, SessionInfo, StoreApi, SubscriptionHandle};
pub use client::NoexClient;
pub use client_builder::ClientBuilder;
pub use config::{
    default_non_retryable_close_codes, AuthOptions, ClientOptions, Credentials, NonRetryableCode,
    ReconnectOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_REQUEST_TIMEOUT,
};
pub use connection_state::{CloseInfo, ConnectionManager, ConnectionState, TransportState};
pub use events::{ClientEvent, EventKind, EventRegistry, Unsubscribe};
pub use metrics::ClientMetrics;
pub use push_router::{PushHandler, PushRouter};
pub use reconnect::{ExponentialBackoff, FixedDelay, ReconnectionStrategy};
pub use request::{MessageSink, RequestManager};
pub use subscription::{
    ResubscribeInfo, ResubscribeReport, SubscriptionCallback, SubscriptionEntry, SubscriptionKey,
    SubscriptionManager,
};
pub use transport::{TransportEvent, TransportHandler, WebSocketTransport, CLOSE_ABNORMAL, CLOSE_NO_STATUS};
