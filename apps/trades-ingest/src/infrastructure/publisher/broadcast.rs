//! Broadcast Publisher
//!
//! Fans trades out to in-process subscribers. Slow receivers lag and lose
//! the oldest messages; the publisher never waits.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::application::ports::{PublishError, TradePublisher};
use crate::domain::trade::Trade;

/// A trade as seen by broadcast subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedTrade {
    /// Topic the trade was published under.
    pub topic: String,
    /// Partition key (the symbol).
    pub key: String,
    /// The trade.
    pub trade: Trade,
}

/// In-process fan-out publisher.
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    topic: String,
    tx: broadcast::Sender<PublishedTrade>,
}

impl BroadcastPublisher {
    /// Create a publisher whose channel buffers `capacity` trades per receiver.
    #[must_use]
    pub fn new(topic: impl Into<String>, capacity: usize) -> Self {
        Self {
            topic: topic.into(),
            tx: broadcast::channel(capacity.max(1)).0,
        }
    }

    /// New receiver seeing trades published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PublishedTrade> {
        self.tx.subscribe()
    }

    /// Number of live receivers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

#[async_trait]
impl TradePublisher for BroadcastPublisher {
    async fn publish(&self, key: &str, trade: &Trade) -> Result<(), PublishError> {
        let message = PublishedTrade {
            topic: self.topic.clone(),
            key: key.to_string(),
            trade: trade.clone(),
        };
        // No receivers is not an error.
        let _ = self.tx.send(message);
        Ok(())
    }

    async fn flush(&self) -> Result<(), PublishError> {
        Ok(())
    }
}
