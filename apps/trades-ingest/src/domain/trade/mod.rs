//! Canonical Trade Record
//!
//! The normalized shape every ingestion path produces, regardless of whether
//! the record came from a REST page or a streaming event.
//!
//! # Wire Format (JSON)
//!
//! ```json
//! {
//!   "product_id": "BTCUSDT",
//!   "price": 97500.5,
//!   "quantity": 0.123,
//!   "timestamp": "2024-11-26T16:00:00Z",
//!   "timestamp_ms": 1732636800000
//! }
//! ```
//!
//! Field names are fixed by the downstream candle aggregation stage.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

// =============================================================================
// Errors
// =============================================================================

/// Errors raised while building a [`Trade`] or converting timestamps.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TradeError {
    /// Symbol was empty.
    #[error("trade symbol cannot be empty")]
    EmptySymbol,

    /// Millisecond timestamp outside the representable calendar range.
    #[error("timestamp {0}ms is out of range")]
    TimestampOutOfRange(i64),

    /// ISO-8601 string could not be parsed.
    #[error("invalid ISO-8601 timestamp '{input}': {reason}")]
    InvalidTimestamp {
        /// The rejected input.
        input: String,
        /// Parser error description.
        reason: String,
    },
}

// =============================================================================
// Timestamp Conversion
// =============================================================================

/// Render Unix milliseconds as UTC ISO-8601 with a `Z` suffix.
///
/// The fractional part is omitted when it is zero and otherwise rendered
/// with millisecond precision.
///
/// # Errors
///
/// Returns [`TradeError::TimestampOutOfRange`] if the value cannot be
/// represented as a calendar date.
pub fn unix_ms_to_iso(timestamp_ms: i64) -> Result<String, TradeError> {
    DateTime::<Utc>::from_timestamp_millis(timestamp_ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
        .ok_or(TradeError::TimestampOutOfRange(timestamp_ms))
}

/// Parse an RFC 3339 / ISO-8601 timestamp into Unix milliseconds.
///
/// Sub-millisecond digits are truncated.
///
/// # Errors
///
/// Returns [`TradeError::InvalidTimestamp`] if the string is not RFC 3339.
pub fn iso_to_unix_ms(iso: &str) -> Result<i64, TradeError> {
    DateTime::parse_from_rfc3339(iso)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| TradeError::InvalidTimestamp {
            input: iso.to_string(),
            reason: e.to_string(),
        })
}

// =============================================================================
// Trade
// =============================================================================

/// An executed trade, normalized and immutable.
///
/// `event_time_iso` is derived from `event_time_ms` at construction and the
/// fields are private, so the two renderings cannot disagree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trade {
    #[serde(rename = "product_id")]
    symbol: String,
    price: f64,
    quantity: f64,
    #[serde(rename = "timestamp")]
    event_time_iso: String,
    #[serde(rename = "timestamp_ms")]
    event_time_ms: i64,
}

impl Trade {
    /// Build a trade from its raw parts.
    ///
    /// Price and quantity are carried as given; positivity is expected but
    /// not enforced.
    ///
    /// # Errors
    ///
    /// Returns an error if `symbol` is empty or `event_time_ms` is outside
    /// the representable range.
    pub fn new(
        symbol: impl Into<String>,
        price: f64,
        quantity: f64,
        event_time_ms: i64,
    ) -> Result<Self, TradeError> {
        let symbol = symbol.into();
        if symbol.is_empty() {
            return Err(TradeError::EmptySymbol);
        }

        Ok(Self {
            symbol,
            price,
            quantity,
            event_time_iso: unix_ms_to_iso(event_time_ms)?,
            event_time_ms,
        })
    }

    /// Trading pair symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Executed price.
    #[must_use]
    pub const fn price(&self) -> f64 {
        self.price
    }

    /// Executed quantity.
    #[must_use]
    pub const fn quantity(&self) -> f64 {
        self.quantity
    }

    /// Event time as Unix milliseconds.
    #[must_use]
    pub const fn event_time_ms(&self) -> i64 {
        self.event_time_ms
    }

    /// Event time as UTC ISO-8601.
    #[must_use]
    pub fn event_time_iso(&self) -> &str {
        &self.event_time_iso
    }
}

// =============================================================================
// Tests
// =============================================================================
