//! Trade Publisher Port (Driven Port)
//!
//! Interface for handing normalized trades to a downstream topic.

use async_trait::async_trait;

use crate::domain::trade::Trade;

/// Publishing error.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Trade could not be serialized.
    #[error("trade serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Sink I/O failed.
    #[error("sink I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Sink rejected the message.
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// Port for publishing trades keyed by symbol.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradePublisher: Send + Sync {
    /// Publish one trade under `key`.
    async fn publish(&self, key: &str, trade: &Trade) -> Result<(), PublishError>;

    /// Flush buffered messages. Called once when ingestion ends.
    async fn flush(&self) -> Result<(), PublishError>;
}
