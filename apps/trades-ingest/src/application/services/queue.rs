//! Bounded Trade Queue
//!
//! Producer/consumer channel between stream callbacks and the ingestion
//! loop. Producers never block: when the queue is full the offered trade is
//! dropped and counted.

use std::time::Duration;

use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::application::metrics;
use crate::domain::trade::Trade;

/// Outcome of a non-blocking offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    /// Trade was queued.
    Enqueued,
    /// Queue was full; trade was discarded.
    Dropped,
    /// Consumer is gone; trade was discarded.
    Closed,
}

/// Create a queue holding at most `capacity` trades.
///
/// A zero capacity is raised to one.
#[must_use]
pub fn bounded(capacity: usize) -> (TradeProducer, TradeConsumer) {
    let capacity = capacity.max(1);
    let (tx, rx) = mpsc::channel(capacity);
    (TradeProducer { tx }, TradeConsumer { rx, capacity })
}

/// Cloneable sending half, used from stream callbacks.
#[derive(Debug, Clone)]
pub struct TradeProducer {
    tx: mpsc::Sender<Trade>,
}

impl TradeProducer {
    /// Enqueue without waiting. Drops the trade if the queue is full.
    pub fn offer(&self, trade: Trade) -> Offer {
        match self.tx.try_send(trade) {
            Ok(()) => Offer::Enqueued,
            Err(TrySendError::Full(trade)) => {
                tracing::warn!(
                    symbol = trade.symbol(),
                    timestamp_ms = trade.event_time_ms(),
                    "Trade queue full, dropping trade"
                );
                metrics::record_trade_dropped();
                Offer::Dropped
            }
            Err(TrySendError::Closed(_)) => Offer::Closed,
        }
    }
}

/// Receiving half, owned by the live ingester.
#[derive(Debug)]
pub struct TradeConsumer {
    rx: mpsc::Receiver<Trade>,
    capacity: usize,
}

impl TradeConsumer {
    /// Take every trade queued right now, without waiting.
    ///
    /// At most `capacity` trades are taken per call so a busy producer
    /// cannot keep the drain going forever.
    pub fn drain(&mut self) -> Vec<Trade> {
        let mut batch = Vec::new();
        while batch.len() < self.capacity {
            match self.rx.try_recv() {
                Ok(trade) => batch.push(trade),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        batch
    }

    /// Wait up to `timeout` for one trade.
    ///
    /// Returns `None` on timeout, on cancellation, or when every producer
    /// is gone.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Option<Trade> {
        tokio::select! {
            () = cancel.cancelled() => None,
            received = tokio::time::timeout(timeout, self.rx.recv()) => received.ok().flatten(),
        }
    }

    /// Trades currently queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    /// Whether nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Maximum number of queued trades.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}
