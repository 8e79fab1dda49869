//! Prometheus Metrics Module
//!
//! Exposes gateway metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Upstream**: Records received per data kind, decode errors, reconnects
//! - **Fan-out**: Broadcasts, deliveries, failed and dropped dispatches
//! - **Connections**: Live downstream connections and users
//! - **Latency**: Time to route one upstream record
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder is already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let builder = PrometheusBuilder::new();
            let handle = builder
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Upstream
    describe_counter!(
        "market_gateway_upstream_messages_total",
        "Total records received from the quote service by data kind"
    );
    describe_counter!(
        "market_gateway_upstream_decode_errors_total",
        "Total upstream records that could not be decoded"
    );
    describe_counter!(
        "market_gateway_stream_reconnects_total",
        "Total upstream stream reconnection attempts"
    );
    describe_gauge!(
        "market_gateway_active_pairs",
        "Number of pairs with running upstream readers"
    );

    // Fan-out
    describe_counter!(
        "market_gateway_broadcasts_total",
        "Total messages fanned out by topic"
    );
    describe_counter!(
        "market_gateway_messages_sent_total",
        "Total frames delivered to downstream connections"
    );
    describe_counter!(
        "market_gateway_dispatch_failures_total",
        "Total frames that failed or timed out on a connection"
    );
    describe_counter!(
        "market_gateway_dispatch_dropped_total",
        "Total frames dropped because dispatch capacity was exhausted"
    );

    // Connections
    describe_gauge!(
        "market_gateway_connections",
        "Number of live downstream connections"
    );
    describe_gauge!(
        "market_gateway_users",
        "Number of users with at least one live connection"
    );

    // Latency
    describe_histogram!(
        "market_gateway_route_duration_seconds",
        "Time to route one upstream record to the hub"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Record a record received from an upstream stream.
pub fn record_upstream_message(kind: &'static str) {
    counter!("market_gateway_upstream_messages_total", "kind" => kind).increment(1);
}

/// Record an upstream record that failed to decode.
pub fn record_decode_error(kind: &'static str) {
    counter!("market_gateway_upstream_decode_errors_total", "kind" => kind).increment(1);
}

/// Record an upstream reconnection attempt.
pub fn record_stream_reconnect(kind: &'static str) {
    counter!("market_gateway_stream_reconnects_total", "kind" => kind).increment(1);
}

/// Update the number of active pairs.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_pairs(count: usize) {
    gauge!("market_gateway_active_pairs").set(count as f64);
}

/// Record one fan-out of a topic message.
pub fn record_broadcast(topic: &'static str) {
    counter!("market_gateway_broadcasts_total", "topic" => topic).increment(1);
}

/// Record a frame delivered to a connection.
pub fn record_message_sent(topic: &'static str) {
    counter!("market_gateway_messages_sent_total", "topic" => topic).increment(1);
}

/// Record a frame that failed on a connection.
pub fn record_dispatch_failure(topic: &'static str) {
    counter!("market_gateway_dispatch_failures_total", "topic" => topic).increment(1);
}

/// Record a frame dropped for lack of dispatch capacity.
pub fn record_dispatch_dropped(topic: &'static str) {
    counter!("market_gateway_dispatch_dropped_total", "topic" => topic).increment(1);
}

/// Update the connection and user gauges.
#[allow(clippy::cast_precision_loss)]
pub fn set_connections(connections: usize, users: usize) {
    gauge!("market_gateway_connections").set(connections as f64);
    gauge!("market_gateway_users").set(users as f64);
}

/// Record routing duration of one upstream record.
pub fn record_route_duration(kind: &'static str, duration: Duration) {
    histogram!("market_gateway_route_duration_seconds", "kind" => kind).record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
