//! Trade History Port (Driven Port)
//!
//! Interface for paging through past trades of one symbol over a
//! half-open time window.

use std::time::Duration;

use async_trait::async_trait;

/// Raw trade as returned by a data source, before normalization.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeRecord {
    /// Executed price.
    pub price: f64,
    /// Executed quantity.
    pub quantity: f64,
    /// Trade time in Unix milliseconds.
    pub event_time_ms: i64,
}

impl TradeRecord {
    /// Create a record.
    #[must_use]
    pub const fn new(price: f64, quantity: f64, event_time_ms: i64) -> Self {
        Self {
            price,
            quantity,
            event_time_ms,
        }
    }
}

/// Fetch error, classified by how the caller should back off.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Source asked us to slow down.
    #[error("rate limited (retry after {retry_after:?})")]
    RateLimited {
        /// Advisory cooldown reported by the source, if any.
        retry_after: Option<Duration>,
    },

    /// Source has banned this client for a while.
    #[error("banned by source (retry after {retry_after:?})")]
    Banned {
        /// Advisory cooldown reported by the source, if any.
        retry_after: Option<Duration>,
    },

    /// Non-success HTTP status other than rate limit or ban.
    #[error("HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Response body or reason.
        message: String,
    },

    /// Transport-level failure.
    #[error("network error: {0}")]
    Network(String),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),
}

impl FetchError {
    /// Short label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Banned { .. } => "banned",
            Self::Http { .. } => "http",
            Self::Network(_) => "network",
            Self::Decode(_) => "decode",
        }
    }
}

/// Port for historical trade retrieval.
#[async_trait]
pub trait TradeHistorySource: Send + Sync {
    /// Fetch up to `limit` trades for `symbol` with `start_ms <= time < end_ms`,
    /// in ascending time order.
    async fn fetch(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
        limit: u32,
    ) -> Result<Vec<TradeRecord>, FetchError>;
}
