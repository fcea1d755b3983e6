//! Application Services
//!
//! Services that orchestrate domain logic and coordinate between ports.
//!
//! - `HistoricalIngester`: round-robin REST backfill with cooldowns and backoff
//! - `LiveIngester`: streaming subscriptions feeding a bounded queue
//! - `IngestionLoop`: drives either ingester into a publisher

/// Historical backfill ingester.
pub mod historical;

/// Ingestion driver loop and shared status.
pub mod ingestion_loop;

/// Live streaming ingester.
pub mod live;

/// Bounded trade queue with drop-on-full offers.
pub mod queue;

pub use historical::{HistoricalIngester, backoff_delay};
pub use ingestion_loop::{
    IngestionLoop, IngestionPhase, IngestionStatus, IngestionSummary, StatusSnapshot,
};
pub use live::{LiveIngester, LiveState};
pub use queue::{Offer, TradeConsumer, TradeProducer};
