//! Client metrics definitions
//!
//! OpenTelemetry instruments recorded by the client when metrics are enabled
//! through [`ClientBuilder::with_metrics`](crate::ClientBuilder::with_metrics)
//! or [`ClientBuilder::with_observability`](crate::ClientBuilder::with_observability).
//! Export is configured by the host application (see
//! `noex_core::init_observability`); without a meter provider every record
//! call is a no-op.
//!
//! # Metrics Collected
//!
//! - **noex.client.connection.state**: current state (gauge, see
//!   `ConnectionState::as_metric_value`)
//! - **noex.client.requests.total**: requests by type and status (counter)
//! - **noex.client.request.duration**: request latency in seconds (histogram)
//! - **noex.client.errors.total**: failures by error code (counter)
//! - **noex.client.reconnection.attempts** / **.success** (counters)
//! - **noex.client.pushes.received**: pushes by channel (counter)
//! - **noex.client.resubscribe.failures**: subscriptions lost on reconnect
//!   (counter)

use crate::connection_state::ConnectionState;
use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    InstrumentationScope, KeyValue,
};

pub struct ClientMetrics {
    pub connection_state: Gauge<i64>,
    pub requests_total: Counter<u64>,
    pub request_duration: Histogram<f64>,
    pub errors_total: Counter<u64>,
    pub reconnection_attempts: Counter<u64>,
    pub reconnection_success: Counter<u64>,
    pub pushes_received: Counter<u64>,
    pub resubscribe_failures: Counter<u64>,
}

impl ClientMetrics {
    /// Create instruments on the global meter provider
    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into())
            .with_version(env!("CARGO_PKG_VERSION"))
            .build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("noex.client.connection.state")
                .with_description("Connection state (0=disconnected, 1=connecting, 2=connected, 3=reconnecting)")
                .build(),
            requests_total: meter
                .u64_counter("noex.client.requests.total")
                .with_description("Total number of requests sent")
                .build(),
            request_duration: meter
                .f64_histogram("noex.client.request.duration")
                .with_description("Request round-trip time in seconds")
                .with_unit("s")
                .build(),
            errors_total: meter
                .u64_counter("noex.client.errors.total")
                .with_description("Total number of errors encountered")
                .build(),
            reconnection_attempts: meter
                .u64_counter("noex.client.reconnection.attempts")
                .with_description("Total number of reconnection attempts")
                .build(),
            reconnection_success: meter
                .u64_counter("noex.client.reconnection.success")
                .with_description("Total number of successful reconnections")
                .build(),
            pushes_received: meter
                .u64_counter("noex.client.pushes.received")
                .with_description("Total number of push messages received")
                .build(),
            resubscribe_failures: meter
                .u64_counter("noex.client.resubscribe.failures")
                .with_description("Subscriptions dropped because they could not be restored after a reconnect")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: ConnectionState) {
        self.connection_state.record(state.as_metric_value(), &[]);
    }

    pub fn record_request(&self, request_type: &str, status: &str, duration_secs: f64) {
        let attributes = &[
            KeyValue::new("request_type", request_type.to_string()),
            KeyValue::new("status", status.to_string()),
        ];
        self.requests_total.add(1, attributes);
        self.request_duration.record(duration_secs, attributes);
    }

    pub fn record_error(&self, code: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("code", code.to_string())]);
    }

    pub fn record_reconnection_attempt(&self) {
        self.reconnection_attempts.add(1, &[]);
    }

    pub fn record_reconnection_success(&self) {
        self.reconnection_success.add(1, &[]);
    }

    pub fn record_push(&self, channel: &str) {
        self.pushes_received
            .add(1, &[KeyValue::new("channel", channel.to_string())]);
    }

    pub fn record_resubscribe_failures(&self, count: u64) {
        if count > 0 {
            self.resubscribe_failures.add(count, &[]);
        }
    }
}
