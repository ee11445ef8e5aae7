//! Prometheus metrics recorder and metric names.

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the handle used to render the `/metrics` endpoint. Call once at
/// startup, before anything is recorded.
pub fn install_recorder() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across modules.

/// WebSocket connections registered (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "huddle_ws_connections_total";
/// WebSocket connections torn down (counter, labels: reason).
pub const WS_DISCONNECTIONS_TOTAL: &str = "huddle_ws_disconnections_total";
/// Registered WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "huddle_ws_connections_active";
/// Connection lifetime in seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "huddle_ws_connection_duration_seconds";
/// Users with at least one local connection (gauge).
pub const USERS_ONLINE: &str = "huddle_users_online";
/// Messages routed to local connections (counter, labels: kind).
pub const ROUTED_MESSAGES_TOTAL: &str = "huddle_routed_messages_total";
/// Frames enqueued to connections (counter).
pub const DELIVERIES_TOTAL: &str = "huddle_deliveries_total";
/// Frames that could not be enqueued (counter).
pub const DELIVERY_FAILURES_TOTAL: &str = "huddle_delivery_failures_total";
/// Bus events received (counter, labels: topic).
pub const BUS_EVENTS_TOTAL: &str = "huddle_bus_events_total";
/// Bus events dropped as undecodable (counter, labels: topic).
pub const BUS_DECODE_FAILURES_TOTAL: &str = "huddle_bus_decode_failures_total";
/// Bus resubscriptions after a lost subscription (counter, labels: topic).
pub const BUS_RESUBSCRIBES_TOTAL: &str = "huddle_bus_resubscribes_total";
/// Presence transitions published (counter, labels: status).
pub const PRESENCE_TRANSITIONS_TOTAL: &str = "huddle_presence_transitions_total";
/// Typing indicators published from clients (counter, labels: kind).
pub const TYPING_EVENTS_TOTAL: &str = "huddle_typing_events_total";
