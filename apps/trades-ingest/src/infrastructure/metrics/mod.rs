//! Prometheus Metrics Module
//!
//! Exposes ingestion metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Trades**: fetched, received, published and dropped counts
//! - **Errors**: REST fetch errors by kind, malformed stream frames
//! - **Progress**: backfill completion ratio per symbol
//! - **Connections**: stream connection state and reconnects
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. The
//! services record through [`crate::application::metrics`]; this module
//! installs the recorder, describes every metric and records the
//! connection-level ones. Recording before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::application::metrics::{
    BACKFILL_PROGRESS, FETCH_DURATION, FETCH_ERRORS, MALFORMED_MESSAGES, TRADES_DROPPED,
    TRADES_FETCHED, TRADES_PUBLISHED, TRADES_RECEIVED,
};

const WEBSOCKET_RECONNECTS: &str = "trades_ingest_websocket_reconnects_total";
const STREAM_CONNECTED: &str = "trades_ingest_stream_connected";

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Subsequent calls return the handle installed by the first.
///
/// # Errors
///
/// Returns an error if the global recorder cannot be installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();
    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
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
    // Trade counters
    describe_counter!(TRADES_FETCHED, "Trades returned by REST backfill pages");
    describe_counter!(TRADES_RECEIVED, "Trades received from the live stream");
    describe_counter!(TRADES_PUBLISHED, "Trades handed to the publisher");
    describe_counter!(
        TRADES_DROPPED,
        "Live trades dropped because the inbound queue was full"
    );

    // Error counters
    describe_counter!(FETCH_ERRORS, "REST fetch errors by kind");
    describe_counter!(MALFORMED_MESSAGES, "Stream frames that could not be decoded");
    describe_counter!(WEBSOCKET_RECONNECTS, "Stream reconnection attempts");

    // Gauges
    describe_gauge!(
        BACKFILL_PROGRESS,
        "Fraction of the backfill range read per symbol"
    );
    describe_gauge!(STREAM_CONNECTED, "1 while the stream connection is open");

    // Latency
    describe_histogram!(FETCH_DURATION, "REST page fetch latency");
}

// =============================================================================
// Connection Metrics
// =============================================================================

/// Record a stream reconnection attempt.
pub fn record_reconnect() {
    counter!(WEBSOCKET_RECONNECTS).increment(1);
}

/// Update the stream connection gauge.
pub fn set_stream_connected(connected: bool) {
    gauge!(STREAM_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_reconnect();
        set_stream_connected(true);
        set_stream_connected(false);
    }
}
