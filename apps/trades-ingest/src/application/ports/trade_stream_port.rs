//! Trade Stream Port (Driven Port)
//!
//! Interface for a multiplexed streaming connection carrying per-symbol
//! trade subscriptions.
//!
//! Handlers run on the connection's I/O task and must not block.

use std::sync::Arc;

use async_trait::async_trait;

use super::TradeRecord;

/// A decoded trade event routed to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Symbol as reported by the stream.
    pub symbol: String,
    /// Trade payload.
    pub record: TradeRecord,
}

/// A frame that could not be decoded into a trade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed message on {stream}: {reason}")]
pub struct MalformedMessage {
    /// Stream name the frame arrived on.
    pub stream: String,
    /// Decode failure description.
    pub reason: String,
}

/// Callback invoked for every frame routed to a subscription.
pub type MessageHandler = Arc<dyn Fn(Result<InboundMessage, MalformedMessage>) + Send + Sync>;

/// Streaming errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Could not establish the connection.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection task is gone.
    #[error("connection closed")]
    Closed,

    /// Subscribe or unsubscribe request was rejected or not acknowledged.
    #[error("subscription for {symbol} failed: {reason}")]
    Subscription {
        /// Symbol involved.
        symbol: String,
        /// Failure description.
        reason: String,
    },

    /// Timed out waiting for the connection task.
    #[error("timed out: {0}")]
    Timeout(String),
}

/// Port for opening a streaming connection.
#[async_trait]
pub trait TradeStreamSource: Send + Sync {
    /// Open one multiplexed connection.
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError>;
}

/// An open multiplexed connection.
#[async_trait]
pub trait StreamConnection: Send + Sync {
    /// Subscribe to trades for `symbol`, delivering frames to `handler`.
    async fn subscribe(
        &self,
        symbol: &str,
        handler: MessageHandler,
    ) -> Result<Box<dyn StreamSubscription>, StreamError>;

    /// Close the connection and release its I/O task.
    async fn close(&self) -> Result<(), StreamError>;
}

/// A live per-symbol subscription.
#[async_trait]
pub trait StreamSubscription: Send + Sync {
    /// Symbol this subscription delivers.
    fn symbol(&self) -> &str;

    /// Stop delivery and release the subscription.
    async fn unsubscribe(&mut self) -> Result<(), StreamError>;
}
