//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use crate::errors::{Result, ServerError};

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Call once at startup before any metrics are recorded.
pub fn install_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| ServerError::Metrics(e.to_string()))?;
    info!("prometheus metrics recorder installed");
    Ok(handle)
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric names shared by the server and broker crates.

/// WebSocket connections opened total (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "ws_connections_total";
/// WebSocket disconnections total (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "ws_connections_active";
/// Upgrades refused because of the `Origin` header (counter).
pub const WS_ORIGIN_REJECTED_TOTAL: &str = "ws_origin_rejected_total";
/// Frames written to client queues (counter, labels: type).
pub const GRAPHQL_FRAMES_SENT_TOTAL: &str = "graphql_frames_sent_total";
/// Frames dropped because the client queue was full or gone (counter).
pub const GRAPHQL_FRAMES_DROPPED_TOTAL: &str = "graphql_frames_dropped_total";
/// Inbound frames that failed to decode (counter).
pub const GRAPHQL_DECODE_ERRORS_TOTAL: &str = "graphql_decode_errors_total";
/// Live subscriptions (gauge).
pub const GRAPHQL_SUBSCRIPTIONS_ACTIVE: &str = "graphql_subscriptions_active";
/// Subscriptions started (counter).
pub const GRAPHQL_SUBSCRIPTIONS_STARTED_TOTAL: &str = "graphql_subscriptions_started_total";
/// Subscription results delivered inside DATA frames (counter).
pub const GRAPHQL_RESULTS_DELIVERED_TOTAL: &str = "graphql_results_delivered_total";
/// Keep-alive frames sent (counter).
pub const GRAPHQL_KEEPALIVES_SENT_TOTAL: &str = "graphql_keepalives_sent_total";
/// Sessions closed for missing client heartbeats (counter).
pub const GRAPHQL_SESSIONS_TIMED_OUT_TOTAL: &str = "graphql_sessions_timed_out_total";
/// Events published through `POST /events/{topic}` (counter).
pub const EVENTS_PUBLISHED_TOTAL: &str = "events_published_total";
