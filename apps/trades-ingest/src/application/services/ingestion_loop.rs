//! Ingestion Loop
//!
//! Mode-agnostic driver: pulls batches from whichever [`Ingester`] is active
//! and publishes every trade keyed by its symbol until the ingester reports
//! completion or the cancellation token fires.
//!
//! Publish failures end the run and are returned to the caller; source
//! failures never reach this layer.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::application::metrics;
use crate::application::ports::{IngestError, Ingester, TradePublisher};
use crate::domain::mode::IngestionMode;
use crate::domain::trade::Trade;

// =============================================================================
// Status
// =============================================================================

/// Where the loop is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestionPhase {
    /// Acquiring ingester resources.
    Starting,
    /// Pulling and publishing batches.
    Running,
    /// Releasing resources.
    Stopping,
    /// Exited cleanly.
    Finished,
    /// Exited with an error.
    Failed,
}

/// Live counters shared between the loop and the health server.
#[derive(Debug)]
pub struct IngestionStatus {
    mode: IngestionMode,
    phase: parking_lot::RwLock<IngestionPhase>,
    started_at: DateTime<Utc>,
    batches: AtomicU64,
    trades_published: AtomicU64,
    last_trade_ms: AtomicI64,
    last_error: parking_lot::RwLock<Option<String>>,
}

/// Point-in-time copy of [`IngestionStatus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    /// Active mode.
    pub mode: IngestionMode,
    /// Lifecycle phase.
    pub phase: IngestionPhase,
    /// When the status was created.
    pub started_at: DateTime<Utc>,
    /// Batches pulled so far.
    pub batches: u64,
    /// Trades published so far.
    pub trades_published: u64,
    /// Event time of the last published trade.
    pub last_trade_ms: Option<i64>,
    /// Error that ended the run, if any.
    pub last_error: Option<String>,
}

impl IngestionStatus {
    /// Fresh status in the `Starting` phase.
    #[must_use]
    pub fn new(mode: IngestionMode) -> Self {
        Self {
            mode,
            phase: parking_lot::RwLock::new(IngestionPhase::Starting),
            started_at: Utc::now(),
            batches: AtomicU64::new(0),
            trades_published: AtomicU64::new(0),
            last_trade_ms: AtomicI64::new(i64::MIN),
            last_error: parking_lot::RwLock::new(None),
        }
    }

    /// Active mode.
    #[must_use]
    pub const fn mode(&self) -> IngestionMode {
        self.mode
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> IngestionPhase {
        *self.phase.read()
    }

    /// Trades published so far.
    #[must_use]
    pub fn trades_published(&self) -> u64 {
        self.trades_published.load(Ordering::Relaxed)
    }

    fn set_phase(&self, phase: IngestionPhase) {
        *self.phase.write() = phase;
    }

    fn fail(&self, error: &IngestError) {
        *self.last_error.write() = Some(error.to_string());
        self.set_phase(IngestionPhase::Failed);
    }

    fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    fn record_published(&self, trade: &Trade) {
        self.trades_published.fetch_add(1, Ordering::Relaxed);
        self.last_trade_ms
            .fetch_max(trade.event_time_ms(), Ordering::Relaxed);
    }

    /// Copy the current counters.
    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        let last = self.last_trade_ms.load(Ordering::Relaxed);
        StatusSnapshot {
            mode: self.mode,
            phase: self.phase(),
            started_at: self.started_at,
            batches: self.batches.load(Ordering::Relaxed),
            trades_published: self.trades_published(),
            last_trade_ms: (last != i64::MIN).then_some(last),
            last_error: self.last_error.read().clone(),
        }
    }
}

// =============================================================================
// Loop
// =============================================================================

/// Result of a run that ended without error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestionSummary {
    /// Mode that ran.
    pub mode: IngestionMode,
    /// Trades published.
    pub trades_published: u64,
    /// `true` if the ingester finished, `false` if cancelled first.
    pub completed: bool,
}

/// Drives one ingester into one publisher.
pub struct IngestionLoop<P> {
    ingester: Box<dyn Ingester>,
    publisher: P,
    cancel: CancellationToken,
    status: Arc<IngestionStatus>,
}

impl<P: TradePublisher> IngestionLoop<P> {
    /// Create a loop stopped by `cancel`.
    pub fn new(ingester: Box<dyn Ingester>, publisher: P, cancel: CancellationToken) -> Self {
        let status = Arc::new(IngestionStatus::new(ingester.mode()));
        Self {
            ingester,
            publisher,
            cancel,
            status,
        }
    }

    /// Shared status handle for health reporting.
    #[must_use]
    pub fn status(&self) -> Arc<IngestionStatus> {
        Arc::clone(&self.status)
    }

    /// Run until the ingester is done or the token is cancelled.
    ///
    /// A batch in flight when cancellation arrives is published in full
    /// before the ingester is stopped.
    ///
    /// # Errors
    ///
    /// Returns an error if the ingester cannot start or the publisher
    /// rejects a trade. The ingester is stopped in both cases.
    pub async fn run(mut self) -> Result<IngestionSummary, IngestError> {
        let mode = self.ingester.mode();
        tracing::info!(mode = %mode, "Starting ingestion");

        if let Err(e) = self.ingester.start().await {
            tracing::error!(mode = %mode, error = %e, "Ingester failed to start");
            self.ingester.stop().await;
            self.status.fail(&e);
            return Err(e);
        }
        self.status.set_phase(IngestionPhase::Running);

        while !self.ingester.is_done() && !self.cancel.is_cancelled() {
            let batch = self.ingester.next_batch(&self.cancel).await;
            self.status.record_batch();

            if let Err(e) = self.publish_batch(mode, &batch).await {
                tracing::error!(mode = %mode, error = %e, "Publish failed, stopping ingestion");
                self.ingester.stop().await;
                self.status.fail(&e);
                return Err(e);
            }
        }

        let completed = self.ingester.is_done();
        if !completed {
            tracing::info!(mode = %mode, "Shutdown requested, stopping ingester");
        }

        self.status.set_phase(IngestionPhase::Stopping);
        self.ingester.stop().await;

        if let Err(e) = self.publisher.flush().await {
            let e = IngestError::from(e);
            tracing::error!(mode = %mode, error = %e, "Publisher flush failed");
            self.status.fail(&e);
            return Err(e);
        }

        self.status.set_phase(IngestionPhase::Finished);
        let summary = IngestionSummary {
            mode,
            trades_published: self.status.trades_published(),
            completed,
        };
        tracing::info!(
            mode = %mode,
            trades_published = summary.trades_published,
            completed,
            "Ingestion finished"
        );
        Ok(summary)
    }

    async fn publish_batch(&self, mode: IngestionMode, batch: &[Trade]) -> Result<(), IngestError> {
        for trade in batch {
            self.publisher.publish(trade.symbol(), trade).await?;
            self.status.record_published(trade);
        }
        if !batch.is_empty() {
            metrics::record_trades_published(mode, batch.len() as u64);
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
