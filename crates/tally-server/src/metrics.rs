//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the global Prometheus recorder.
///
/// Returns the handle that renders `/metrics`. Fails if a recorder is
/// already installed in this process.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from a handle.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

/// Stream connections that completed the handshake (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// Currently registered stream connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Failed handshakes (counter, labels: kind).
pub const WS_HANDSHAKE_FAILURES_TOTAL: &str = "ws_handshake_failures_total";
/// Connections torn down (counter, labels: reason).
pub const WS_EVICTIONS_TOTAL: &str = "ws_evictions_total";
/// Events accepted by the publisher (counter).
pub const STREAM_EVENTS_PUBLISHED_TOTAL: &str = "stream_events_published_total";
/// Frames queued to connections by the broadcaster (counter).
pub const STREAM_EVENTS_DELIVERED_TOTAL: &str = "stream_events_delivered_total";
