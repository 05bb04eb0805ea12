//! Metrics collection and export for Tableau.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tableau_core::AppStats;
use tracing::info;

/// Metric names.
pub mod names {
    pub const CONNECTIONS_TOTAL: &str = "tableau_connections_total";
    pub const CONNECTIONS_ACTIVE: &str = "tableau_connections_active";
    pub const MESSAGES_TOTAL: &str = "tableau_messages_total";
    pub const MESSAGES_BYTES: &str = "tableau_messages_bytes";
    pub const CALLS_TOTAL: &str = "tableau_calls_total";
    pub const TABLES_ACTIVE: &str = "tableau_tables_active";
    pub const USERS_LOGGED_IN: &str = "tableau_users_logged_in";
    pub const DISPATCH_SECONDS: &str = "tableau_dispatch_seconds";
    pub const ERRORS_TOTAL: &str = "tableau_errors_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::CONNECTIONS_TOTAL,
        "Total number of connections since server start"
    );
    metrics::describe_gauge!(
        names::CONNECTIONS_ACTIVE,
        "Current number of active connections"
    );
    metrics::describe_counter!(names::MESSAGES_TOTAL, "Total number of frames processed");
    metrics::describe_counter!(names::MESSAGES_BYTES, "Total bytes of frames processed");
    metrics::describe_counter!(names::CALLS_TOTAL, "Client calls dispatched, by operation");
    metrics::describe_gauge!(names::TABLES_ACTIVE, "Current number of open tables");
    metrics::describe_gauge!(names::USERS_LOGGED_IN, "Connections with a logged in user");
    metrics::describe_histogram!(
        names::DISPATCH_SECONDS,
        "Time spent processing one inbound message"
    );
    metrics::describe_counter!(names::ERRORS_TOTAL, "Total number of errors");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
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

/// Record a frame.
pub fn record_message(bytes: usize, direction: &'static str) {
    counter!(names::MESSAGES_TOTAL, "direction" => direction).increment(1);
    counter!(names::MESSAGES_BYTES, "direction" => direction).increment(bytes as u64);
}

/// Record one dispatched inbound message.
pub fn record_dispatch(label: String, seconds: f64) {
    counter!(names::CALLS_TOTAL, "op" => label).increment(1);
    histogram!(names::DISPATCH_SECONDS).record(seconds);
}

/// Publish the application gauges.
pub fn set_app_stats(stats: &AppStats) {
    gauge!(names::TABLES_ACTIVE).set(stats.tables as f64);
    gauge!(names::USERS_LOGGED_IN).set(stats.logged_in as f64);
}

/// Record an error.
pub fn record_error(error_type: &'static str) {
    counter!(names::ERRORS_TOTAL, "type" => error_type).increment(1);
}

/// Metrics guard that records disconnection on drop.
pub struct ConnectionMetricsGuard;

impl ConnectionMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        record_connection();
        Self
    }
}

impl Default for ConnectionMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ConnectionMetricsGuard {
    fn drop(&mut self) {
        record_disconnection();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        let _guard = ConnectionMetricsGuard::new();
        record_message(12, "inbound");
        record_dispatch("addShape".to_string(), 0.001);
        set_app_stats(&AppStats::default());
        record_error("bad_frame");
    }
}
