//! Live Stream Ingester
//!
//! Holds one multiplexed stream connection with a subscription per symbol.
//! Subscription callbacks normalize frames into [`Trade`]s and offer them to
//! a bounded queue; [`LiveIngester::next_batch`] drains that queue on the
//! consumer side.
//!
//! # States
//!
//! ```text
//! Created ──start()──► Started ──stop()──► Stopped
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::queue::{self, Offer, TradeConsumer, TradeProducer};
use crate::application::metrics;
use crate::application::ports::{
    InboundMessage, IngestError, Ingester, MalformedMessage, MessageHandler, StreamConnection,
    StreamSubscription, TradeStreamSource,
};
use crate::domain::mode::IngestionMode;
use crate::domain::trade::Trade;

/// Longest `next_batch` waits for a first trade when the queue is empty.
pub const BATCH_WAIT: Duration = Duration::from_secs(1);

/// Lifecycle of a [`LiveIngester`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveState {
    /// Constructed, not connected.
    Created,
    /// Connected and subscribed.
    Started,
    /// Subscriptions and connection released.
    Stopped,
}

/// Streaming subscriber with a bounded inbound queue.
pub struct LiveIngester<S> {
    source: S,
    symbols: Vec<String>,
    producer: TradeProducer,
    consumer: TradeConsumer,
    connection: Option<Box<dyn StreamConnection>>,
    subscriptions: Vec<Box<dyn StreamSubscription>>,
    state: LiveState,
}

impl<S: TradeStreamSource> LiveIngester<S> {
    /// Create an ingester for `symbols` (lowercased) buffering at most
    /// `queue_capacity` trades.
    pub fn new<T: AsRef<str>>(symbols: &[T], source: S, queue_capacity: usize) -> Self {
        let (producer, consumer) = queue::bounded(queue_capacity);
        Self {
            source,
            symbols: symbols
                .iter()
                .map(|s| s.as_ref().trim().to_lowercase())
                .collect(),
            producer,
            consumer,
            connection: None,
            subscriptions: Vec::new(),
            state: LiveState::Created,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> LiveState {
        self.state
    }

    /// Configured symbols, lowercased.
    #[must_use]
    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    /// Symbols with an open subscription.
    #[must_use]
    pub fn subscribed(&self) -> Vec<&str> {
        self.subscriptions.iter().map(|s| s.symbol()).collect()
    }

    /// Trades waiting in the queue.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.consumer.len()
    }

    fn handler(&self) -> MessageHandler {
        let producer = self.producer.clone();
        Arc::new(move |message| on_message(&producer, message))
    }
}

/// Callback boundary: normalize and enqueue, never block, never panic.
fn on_message(producer: &TradeProducer, message: Result<InboundMessage, MalformedMessage>) {
    let InboundMessage { symbol, record } = match message {
        Ok(inbound) => inbound,
        Err(malformed) => {
            tracing::warn!(
                stream = %malformed.stream,
                reason = %malformed.reason,
                "Dropping malformed stream message"
            );
            metrics::record_malformed_message();
            return;
        }
    };

    match Trade::new(symbol, record.price, record.quantity, record.event_time_ms) {
        Ok(trade) => {
            metrics::record_trade_received(trade.symbol());
            if producer.offer(trade) == Offer::Closed {
                tracing::debug!("Trade queue closed, discarding trade");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "Dropping stream trade that failed normalization");
            metrics::record_malformed_message();
        }
    }
}

#[async_trait]
impl<S: TradeStreamSource> Ingester for LiveIngester<S> {
    fn mode(&self) -> IngestionMode {
        IngestionMode::Live
    }

    async fn start(&mut self) -> Result<(), IngestError> {
        if self.state != LiveState::Created {
            return Ok(());
        }

        let connection = self.source.connect().await?;
        let handler = self.handler();

        for symbol in self.symbols.clone() {
            match connection.subscribe(&symbol, Arc::clone(&handler)).await {
                Ok(subscription) => {
                    tracing::info!(symbol = %symbol, "Subscribed to trades");
                    self.subscriptions.push(subscription);
                }
                Err(e) => {
                    tracing::error!(symbol = %symbol, error = %e, "Subscription failed");
                }
            }
        }

        self.connection = Some(connection);
        self.state = LiveState::Started;
        tracing::info!(
            subscribed = self.subscriptions.len(),
            requested = self.symbols.len(),
            "Live ingestion started"
        );
        Ok(())
    }

    async fn next_batch(&mut self, cancel: &CancellationToken) -> Vec<Trade> {
        let mut batch = self.consumer.drain();
        if !batch.is_empty() || self.state == LiveState::Stopped {
            return batch;
        }

        if let Some(first) = self.consumer.recv_timeout(BATCH_WAIT, cancel).await {
            batch.push(first);
            batch.extend(self.consumer.drain());
        }
        batch
    }

    fn is_done(&self) -> bool {
        self.state == LiveState::Stopped
    }

    async fn stop(&mut self) {
        if self.state == LiveState::Stopped {
            return;
        }

        for mut subscription in std::mem::take(&mut self.subscriptions) {
            if let Err(e) = subscription.unsubscribe().await {
                tracing::warn!(
                    symbol = subscription.symbol(),
                    error = %e,
                    "Unsubscribe failed during shutdown"
                );
            }
        }

        if let Some(connection) = self.connection.take()
            && let Err(e) = connection.close().await
        {
            tracing::warn!(error = %e, "Closing stream connection failed during shutdown");
        }

        self.state = LiveState::Stopped;
        tracing::info!("Live ingestion stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::application::ports::{StreamError, TradeRecord};

    #[derive(Default)]
    struct Shared {
        handlers: Mutex<Vec<(String, MessageHandler)>>,
        unsubscribed: Mutex<Vec<String>>,
        closed: Mutex<bool>,
    }

    struct FakeSource {
        shared: Arc<Shared>,
        refuse_connect: bool,
        reject_symbol: Option<&'static str>,
        fail_cleanup: bool,
    }

    impl FakeSource {
        fn new() -> (Self, Arc<Shared>) {
            let shared = Arc::new(Shared::default());
            let source = Self {
                shared: Arc::clone(&shared),
                refuse_connect: false,
                reject_symbol: None,
                fail_cleanup: false,
            };
            (source, shared)
        }
    }

    struct FakeConnection {
        shared: Arc<Shared>,
        reject_symbol: Option<&'static str>,
        fail_cleanup: bool,
    }

    struct FakeSubscription {
        symbol: String,
        shared: Arc<Shared>,
        fail_cleanup: bool,
    }

    #[async_trait]
    impl TradeStreamSource for FakeSource {
        async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
            if self.refuse_connect {
                return Err(StreamError::ConnectionFailed("refused".into()));
            }
            Ok(Box::new(FakeConnection {
                shared: Arc::clone(&self.shared),
                reject_symbol: self.reject_symbol,
                fail_cleanup: self.fail_cleanup,
            }))
        }
    }

    #[async_trait]
    impl StreamConnection for FakeConnection {
        async fn subscribe(
            &self,
            symbol: &str,
            handler: MessageHandler,
        ) -> Result<Box<dyn StreamSubscription>, StreamError> {
            if self.reject_symbol == Some(symbol) {
                return Err(StreamError::Subscription {
                    symbol: symbol.to_string(),
                    reason: "rejected".into(),
                });
            }
            self.shared
                .handlers
                .lock()
                .push((symbol.to_string(), handler));
            Ok(Box::new(FakeSubscription {
                symbol: symbol.to_string(),
                shared: Arc::clone(&self.shared),
                fail_cleanup: self.fail_cleanup,
            }))
        }

        async fn close(&self) -> Result<(), StreamError> {
            *self.shared.closed.lock() = true;
            if self.fail_cleanup {
                Err(StreamError::Closed)
            } else {
                Ok(())
            }
        }
    }

    #[async_trait]
    impl StreamSubscription for FakeSubscription {
        fn symbol(&self) -> &str {
            &self.symbol
        }

        async fn unsubscribe(&mut self) -> Result<(), StreamError> {
            self.shared.unsubscribed.lock().push(self.symbol.clone());
            if self.fail_cleanup {
                Err(StreamError::Timeout("unsubscribe".into()))
            } else {
                Ok(())
            }
        }
    }

    fn emit(shared: &Shared, index: usize, time_ms: i64) {
        let handler = Arc::clone(&shared.handlers.lock()[index].1);
        handler(Ok(InboundMessage {
            symbol: "BTCUSDT".into(),
            record: TradeRecord::new(100.0, 0.5, time_ms),
        }));
    }

    #[tokio::test]
    async fn start_subscribes_each_symbol_lowercased() {
        let (source, shared) = FakeSource::new();
        let mut ing = LiveIngester::new(&["BTCUSDT", "EthUsdt"], source, 16);

        ing.start().await.unwrap();

        assert_eq!(ing.state(), LiveState::Started);
        assert_eq!(ing.subscribed(), vec!["btcusdt", "ethusdt"]);
        let names: Vec<String> = shared.handlers.lock().iter().map(|(s, _)| s.clone()).collect();
        assert_eq!(names, vec!["btcusdt", "ethusdt"]);
    }

    #[tokio::test]
    async fn connect_failure_is_returned() {
        let (mut source, _shared) = FakeSource::new();
        source.refuse_connect = true;
        let mut ing = LiveIngester::new(&["BTCUSDT"], source, 16);

        let err = ing.start().await.unwrap_err();

        assert!(matches!(err, IngestError::Start(StreamError::ConnectionFailed(_))));
        assert_eq!(ing.state(), LiveState::Created);
    }

    #[tokio::test]
    async fn one_rejected_subscription_does_not_block_others() {
        let (mut source, _shared) = FakeSource::new();
        source.reject_symbol = Some("ethusdt");
        let mut ing = LiveIngester::new(&["BTCUSDT", "ETHUSDT", "SOLUSDT"], source, 16);

        ing.start().await.unwrap();

        assert_eq!(ing.subscribed(), vec!["btcusdt", "solusdt"]);
    }

    #[tokio::test(start_paused = true)]
    async fn drains_queued_trades_without_waiting() {
        let (source, shared) = FakeSource::new();
        let mut ing = LiveIngester::new(&["BTCUSDT"], source, 16);
        ing.start().await.unwrap();

        for ms in 1..=5 {
            emit(&shared, 0, ms);
        }

        let started = tokio::time::Instant::now();
        let batch = ing.next_batch(&CancellationToken::new()).await;

        assert_eq!(batch.len(), 5);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_queue_waits_for_timeout() {
        let (source, _shared) = FakeSource::new();
        let mut ing = LiveIngester::new(&["BTCUSDT"], source, 16);
        ing.start().await.unwrap();

        let started = tokio::time::Instant::now();
        let batch = ing.next_batch(&CancellationToken::new()).await;

        assert!(batch.is_empty());
        assert!(started.elapsed() >= BATCH_WAIT);
    }

    #[tokio::test]
    async fn overflow_drops_newest_without_blocking() {
        let (source, shared) = FakeSource::new();
        let mut ing = LiveIngester::new(&["BTCUSDT"], source, 2);
        ing.start().await.unwrap();

        for ms in 1..=4 {
            emit(&shared, 0, ms);
        }

        let times: Vec<i64> = ing
            .next_batch(&CancellationToken::new())
            .await
            .iter()
            .map(Trade::event_time_ms)
            .collect();
        assert_eq!(times, vec![1, 2]);
    }

    #[tokio::test]
    async fn malformed_messages_are_dropped() {
        let (source, shared) = FakeSource::new();
        let mut ing = LiveIngester::new(&["BTCUSDT"], source, 8);
        ing.start().await.unwrap();

        let handler = Arc::clone(&shared.handlers.lock()[0].1);
        handler(Err(MalformedMessage {
            stream: "btcusdt@aggTrade".into(),
            reason: "missing field `p`".into(),
        }));
        handler(Ok(InboundMessage {
            symbol: String::new(),
            record: TradeRecord::new(1.0, 1.0, 1),
        }));
        emit(&shared, 0, 7);

        assert_eq!(ing.queued(), 1);
    }

    #[tokio::test]
    async fn stop_swallows_cleanup_errors() {
        let (mut source, shared) = FakeSource::new();
        source.fail_cleanup = true;
        let mut ing = LiveIngester::new(&["BTCUSDT", "ETHUSDT"], source, 8);
        ing.start().await.unwrap();

        ing.stop().await;

        assert!(ing.is_done());
        assert_eq!(ing.state(), LiveState::Stopped);
        assert_eq!(*shared.unsubscribed.lock(), vec!["btcusdt", "ethusdt"]);
        assert!(*shared.closed.lock());
    }

    #[tokio::test]
    async fn stopped_ingester_returns_immediately() {
        let (source, _shared) = FakeSource::new();
        let mut ing = LiveIngester::new(&["BTCUSDT"], source, 8);
        ing.start().await.unwrap();
        ing.stop().await;

        let batch = tokio::time::timeout(
            Duration::from_millis(100),
            ing.next_batch(&CancellationToken::new()),
        )
        .await
        .unwrap();
        assert!(batch.is_empty());
    }
}
