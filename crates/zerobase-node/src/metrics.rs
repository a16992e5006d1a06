//! Metrics export for the node runner.
//!
//! The core crate records through the `metrics` facade; this module
//! installs the Prometheus exporter and adds runner-level counters.

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Runner metric names.
pub mod names {
    pub const HEARTBEATS_TOTAL: &str = "zerobase_heartbeats_total";
}

/// Describe every metric.
pub fn init_metrics() {
    zerobase_core::metrics::describe_metrics();
    metrics::describe_counter!(names::HEARTBEATS_TOTAL, "Heartbeats published by the runner");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record a published heartbeat.
pub fn record_heartbeat() {
    counter!(names::HEARTBEATS_TOTAL).increment(1);
}
