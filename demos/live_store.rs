//! Live store subscription example
//!
//! Connects to a noex-server, subscribes to a query and prints every update.
//! Restart the server while it runs to watch the client reconnect and
//! restore the subscription.
//!
//! Usage:
//! 1. Start a noex-server on ws://127.0.0.1:8080
//! 2. cargo run --example live_store

use noex::client::ReconnectOptions;
use noex::{ClientBuilder, ClientEvent, EventKind};
use serde_json::json;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let client = ClientBuilder::new("ws://127.0.0.1:8080")
        .with_reconnect(
            ReconnectOptions::default()
                .with_initial_delay(Duration::from_millis(500))
                .with_max_delay(Duration::from_secs(10)),
        )
        .build()?;

    for kind in [
        EventKind::Disconnected,
        EventKind::Reconnecting,
        EventKind::Reconnected,
    ] {
        client.on(kind, |event| match event {
            ClientEvent::Disconnected { reason } => println!("disconnected: {}", reason),
            ClientEvent::Reconnecting { attempt } => println!("reconnecting (attempt {})", attempt),
            ClientEvent::Reconnected => println!("reconnected, subscriptions restored"),
            _ => {}
        });
    }

    let welcome = client.connect().await?;
    println!("Connected to noex-server {}", welcome.version);

    let tasks = client.store().bucket("tasks");
    tasks.insert(json!({"title": "Write docs", "done": false})).await?;

    let handle = client
        .store()
        .subscribe("open-tasks", None, |tasks| println!("open tasks: {}", tasks))
        .await?;
    println!("Subscribed as {:?}. Press Ctrl+C to stop", handle.id());

    tokio::signal::ctrl_c().await?;

    handle.unsubscribe_await().await?;
    client.disconnect().await;
    Ok(())
}
