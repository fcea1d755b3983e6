//! Service Metrics
//!
//! Names and recording helpers for the metrics the ingestion services emit.
//! Everything goes through the `metrics` facade; the Prometheus recorder is
//! installed by the infrastructure layer. Recording with no recorder
//! installed is a no-op.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::domain::mode::IngestionMode;

/// Trades returned by REST backfill pages, by symbol.
pub const TRADES_FETCHED: &str = "trades_ingest_trades_fetched_total";
/// Trades received from the live stream, by symbol.
pub const TRADES_RECEIVED: &str = "trades_ingest_trades_received_total";
/// Trades handed to the publisher, by mode.
pub const TRADES_PUBLISHED: &str = "trades_ingest_trades_published_total";
/// Live trades dropped on a full queue.
pub const TRADES_DROPPED: &str = "trades_ingest_trades_dropped_total";
/// REST fetch errors, by kind.
pub const FETCH_ERRORS: &str = "trades_ingest_fetch_errors_total";
/// Stream frames that could not be decoded.
pub const MALFORMED_MESSAGES: &str = "trades_ingest_malformed_messages_total";
/// Backfill completion ratio, by symbol.
pub const BACKFILL_PROGRESS: &str = "trades_ingest_backfill_progress_ratio";
/// REST page fetch latency in seconds.
pub const FETCH_DURATION: &str = "trades_ingest_fetch_duration_seconds";

/// Record trades returned by a REST page.
pub fn record_trades_fetched(symbol: &str, count: u64) {
    counter!(TRADES_FETCHED, "symbol" => symbol.to_string()).increment(count);
}

/// Record a trade received from the live stream.
pub fn record_trade_received(symbol: &str) {
    counter!(TRADES_RECEIVED, "symbol" => symbol.to_string()).increment(1);
}

/// Record trades handed to the publisher.
pub fn record_trades_published(mode: IngestionMode, count: u64) {
    counter!(TRADES_PUBLISHED, "mode" => mode.as_str()).increment(count);
}

/// Record a live trade dropped on a full queue.
pub fn record_trade_dropped() {
    counter!(TRADES_DROPPED).increment(1);
}

/// Record a REST fetch error.
pub fn record_fetch_error(kind: &'static str) {
    counter!(FETCH_ERRORS, "kind" => kind).increment(1);
}

/// Record a malformed stream frame.
pub fn record_malformed_message() {
    counter!(MALFORMED_MESSAGES).increment(1);
}

/// Update backfill progress for a symbol.
pub fn set_backfill_progress(symbol: &str, ratio: f64) {
    gauge!(BACKFILL_PROGRESS, "symbol" => symbol.to_string()).set(ratio);
}

/// Record REST page fetch duration.
pub fn record_fetch_duration(duration: Duration) {
    histogram!(FETCH_DURATION).record(duration.as_secs_f64());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_without_recorder_is_noop() {
        record_trades_fetched("BTCUSDT", 3);
        record_trade_received("BTCUSDT");
        record_trades_published(IngestionMode::Live, 1);
        record_trade_dropped();
        record_fetch_error("network");
        record_malformed_message();
        set_backfill_progress("BTCUSDT", 0.5);
        record_fetch_duration(Duration::from_millis(20));
    }
}
