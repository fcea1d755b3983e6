#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::cast_possible_truncation,
        clippy::cast_possible_wrap
    )
)]

//! Trades Ingest - Exchange Trade Ingestion
//!
//! Pulls executed trades for a set of symbols from Binance USD-M futures and
//! publishes each one, keyed by symbol, to the downstream pipeline. Runs in
//! one of two modes:
//!
//! - **Historical**: round-robin REST backfill of the last N days, one
//!   hour-sized page per call, until every symbol reaches the end of its range
//! - **Live**: combined WebSocket stream feeding a bounded queue that drops the
//!   newest trade when full
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: `trade`, `cursor`, `mode`
//! - **Application**: ports (history source, stream source, publisher,
//!   ingester), services (historical and live ingesters, bounded queue,
//!   ingestion loop) and the metrics they record
//! - **Infrastructure**: Binance adapters, publishers, config, health,
//!   Prometheus exporter, telemetry
//!
//! # Data Flow
//!
//! ```text
//! REST aggTrades ──► HistoricalIngester ─┐
//!                                        ├──► IngestionLoop ──► TradePublisher
//! WS aggTrade ──► queue ──► LiveIngester ┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Trade records, backfill cursors, ingestion mode.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::cursor::{CursorBook, SymbolCursor};
pub use domain::mode::IngestionMode;
pub use domain::trade::{Trade, TradeError, iso_to_unix_ms, unix_ms_to_iso};

// Ports
pub use application::ports::{
    FetchError, IngestError, Ingester, PublishError, StreamError, TradeHistorySource,
    TradePublisher, TradeRecord, TradeStreamSource,
};

// Services
pub use application::services::{
    HistoricalIngester, IngestionLoop, IngestionStatus, IngestionSummary, LiveIngester,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, Credentials, IngestConfig};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Binance adapters (for integration tests)
pub use infrastructure::binance::{
    BinanceRestClient, BinanceRestConfig, BinanceStreamConfig, BinanceStreamSource,
    ReconnectConfig,
};

// Publishers
pub use infrastructure::publisher::{BroadcastPublisher, JsonLinesPublisher, PublishedTrade};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
