//! Observability client example
//!
//! Exports client traces and metrics over OTLP while issuing requests.
//!
//! Run with: cargo run --example observability_client

use noex::core::{shutdown_observability, ObservabilityConfig};
use noex::ClientBuilder;
use serde::{Deserialize, Serialize};

#[derive(Serialize)]
struct CountParams<'a> {
    bucket: &'a str,
}

#[derive(Deserialize)]
struct Counted(u64);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let otel_config = ObservabilityConfig::new("noex-observability-client")
        .with_endpoint("http://localhost:4317")
        .with_log_level("debug");

    let client = ClientBuilder::new("ws://127.0.0.1:8080")
        .with_observability(otel_config)
        .connect()
        .await?;

    for i in 1..=5 {
        tracing::info!(iteration = i, "Starting iteration");

        let Counted(n) = client
            .request_as("store.count", CountParams { bucket: "users" })
            .await?;
        println!("Iteration {}: {} users", i, n);

        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    }

    client.disconnect().await;
    shutdown_observability();
    Ok(())
}
