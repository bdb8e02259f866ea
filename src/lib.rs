//! noex - async client for noex-server
//!
//! This is the convenience crate that re-exports the noex sub-crates. Use it
//! when you want a single dependency for the client and its wire types.
//!
//! # Architecture
//!
//! - **noex-core**: wire types, codec, error taxonomy, observability setup
//! - **noex-client**: WebSocket client with request correlation, live
//!   subscriptions and automatic reconnection
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use noex::NoexClient;
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = NoexClient::connect_to("ws://localhost:8080").await?;
//!
//!     let users = client.store().bucket("users");
//!     users.insert(json!({"name": "Alice"})).await?;
//!
//!     let handle = client
//!         .store()
//!         .subscribe("all-users", None, |users| println!("users: {}", users))
//!         .await?;
//!
//!     handle.unsubscribe();
//!     client.disconnect().await;
//!     Ok(())
//! }
//! ```

pub use noex_client as client;
pub use noex_core as core;

pub use noex_client::{ClientBuilder, ClientEvent, ConnectionState, EventKind, NoexClient};
pub use noex_core::{Error, Result};
