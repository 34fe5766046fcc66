//! Metrics collection and export for Switchboard.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use anyhow::{Context, Result};
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tenvis_switchboard_core::{CallRecord, Coordinator, Dispatcher};
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "switchboard_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "switchboard_connections_active";
    pub const CALLS_TOTAL: &str = "switchboard_calls_total";
    pub const CALL_LATENCY_SECONDS: &str = "switchboard_call_latency_seconds";
    pub const CHANNEL_CHANGES_TOTAL: &str = "switchboard_channel_changes_total";
    pub const ERRORS_TOTAL: &str = "switchboard_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of client connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of connected clients"
    );
    metrics::describe_counter!(names::CALLS_TOTAL, "Total number of dispatched calls");
    metrics::describe_histogram!(
        names::CALL_LATENCY_SECONDS,
        "Time spent in provider actions in seconds"
    );
    metrics::describe_counter!(
        names::CHANNEL_CHANGES_TOTAL,
        "Total number of channel membership changes"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of failed calls");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the exporter cannot be installed.
pub fn start_metrics_server(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record metrics for broker activity.
pub fn observe(dispatcher: &Dispatcher, coordinator: &Coordinator) {
    dispatcher.on_connection.add(|_| record_connection());
    dispatcher.on_disconnection.add(|_| record_disconnection());
    dispatcher.on_call_completed.add(record_call);
    coordinator.on_channel_changed.add(|_| record_channel_change());
}

/// Record a new connection.
pub fn record_connection() {
    counter!(names::CONNECTIONS_TOTAL).increment(1);
    gauge!(names::CONNECTIONS_ACTIVE).increment(1.0);
}

/// Record a disconnection.
pub fn record_disconnection() {
    gauge!(names::CONNECTIONS_ACTIVE).decrement(1.0);
}

/// Record a completed call.
pub fn record_call(record: &CallRecord) {
    let outcome = if record.error_kind.is_some() { "error" } else { "ok" };
    counter!(
        names::CALLS_TOTAL,
        "topic" => record.topic.clone(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(names::CALL_LATENCY_SECONDS, "topic" => record.topic.clone())
        .record(record.elapsed.as_secs_f64());

    if let Some(kind) = &record.error_kind {
        record_error(kind);
    }
}

/// Record a channel membership change.
pub fn record_channel_change() {
    counter!(names::CHANNEL_CHANGES_TOTAL).increment(1);
}

/// Record an error.
pub fn record_error(kind: &str) {
    counter!(names::ERRORS_TOTAL, "kind" => kind.to_string()).increment(1);
}
