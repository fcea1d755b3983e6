//! Ingester Port (Driver Port)
//!
//! The capability set the ingestion loop drives, implemented by both the
//! historical and the live ingester.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{PublishError, StreamError};
use crate::domain::mode::IngestionMode;
use crate::domain::trade::Trade;

/// Errors that end an ingestion run.
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// Ingester could not start.
    #[error("ingester failed to start: {0}")]
    Start(#[from] StreamError),

    /// Publisher rejected a trade.
    #[error("publish failed: {0}")]
    Publish(#[from] PublishError),
}

/// A source of trade batches.
#[async_trait]
pub trait Ingester: Send + Sync {
    /// Mode this ingester implements.
    fn mode(&self) -> IngestionMode;

    /// Acquire resources. Called once before the first batch.
    async fn start(&mut self) -> Result<(), IngestError> {
        Ok(())
    }

    /// Next batch of trades; may be empty.
    ///
    /// `cancel` lets bounded waits end early on shutdown.
    async fn next_batch(&mut self, cancel: &CancellationToken) -> Vec<Trade>;

    /// Whether no further batches will be produced.
    fn is_done(&self) -> bool;

    /// Release resources. Errors are logged, never returned.
    async fn stop(&mut self) {}
}
