//! JSON Lines Publisher
//!
//! Writes go through tokio's async I/O, so a slow reader on the other end of
//! the pipe parks the publishing task instead of a runtime worker.
//!
//! # Line Format
//!
//! ```json
//! {"topic":"trades","key":"BTCUSDT","value":{"product_id":"BTCUSDT","price":97500.5,...}}
//! ```

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{self, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use crate::application::ports::{PublishError, TradePublisher};
use crate::domain::trade::Trade;

#[derive(Serialize)]
struct Envelope<'a> {
    topic: &'a str,
    key: &'a str,
    value: &'a Trade,
}

/// Writes one keyed JSON envelope per trade.
pub struct JsonLinesPublisher<W> {
    topic: String,
    writer: Mutex<W>,
}

impl JsonLinesPublisher<io::Stdout> {
    /// Publisher writing to standard output.
    #[must_use]
    pub fn stdout(topic: impl Into<String>) -> Self {
        Self::new(topic, io::stdout())
    }
}

impl<W: AsyncWrite + Unpin + Send> JsonLinesPublisher<W> {
    /// Publisher writing to `writer`.
    pub fn new(topic: impl Into<String>, writer: W) -> Self {
        Self {
            topic: topic.into(),
            writer: Mutex::new(writer),
        }
    }

    /// Topic every envelope is tagged with.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Recover the writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> TradePublisher for JsonLinesPublisher<W> {
    async fn publish(&self, key: &str, trade: &Trade) -> Result<(), PublishError> {
        let mut line = serde_json::to_vec(&Envelope {
            topic: &self.topic,
            key,
            value: trade,
        })?;
        line.push(b'\n');

        // Flushed per line so readers see trades as they arrive.
        let mut writer = self.writer.lock().await;
        writer.write_all(&line).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn flush(&self) -> Result<(), PublishError> {
        self.writer.lock().await.flush().await?;
        Ok(())
    }
}
