//! Binance Wire Messages
//!
//! Serde types for the USD-M futures `aggTrades` REST endpoint and the
//! combined-stream WebSocket protocol.
//!
//! # REST record
//!
//! ```json
//! {"a": 26129, "p": "0.01633102", "q": "4.70443515", "f": 27781, "l": 27781, "T": 1498793709153, "m": true}
//! ```
//!
//! # Combined stream frame
//!
//! ```json
//! {"stream": "btcusdt@aggTrade", "data": {"e": "aggTrade", "E": 123456789, "s": "BTCUSDT", ...}}
//! ```
//!
//! # Control response
//!
//! ```json
//! {"result": null, "id": 1}
//! ```

use serde::{Deserialize, Serialize};

use crate::application::ports::{InboundMessage, TradeRecord};

/// Stream name carrying aggregated trades for `symbol`.
#[must_use]
pub fn agg_trade_stream(symbol: &str) -> String {
    format!("{}@aggTrade", symbol.to_lowercase())
}

// =============================================================================
// REST
// =============================================================================

/// One aggregated trade from `GET /fapi/v1/aggTrades`.
///
/// Every field is optional so a partially filled record still decodes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RestAggTrade {
    /// Aggregate trade id.
    #[serde(rename = "a")]
    pub id: Option<u64>,
    /// Price as a decimal string.
    #[serde(rename = "p")]
    pub price: Option<String>,
    /// Quantity as a decimal string.
    #[serde(rename = "q")]
    pub quantity: Option<String>,
    /// Trade time in milliseconds.
    #[serde(rename = "T")]
    pub trade_time: Option<i64>,
    /// Whether the buyer was the maker.
    #[serde(rename = "m")]
    pub buyer_is_maker: Option<bool>,
}

impl RestAggTrade {
    /// Normalize into a [`TradeRecord`].
    ///
    /// Missing or unparseable numbers become zero.
    #[must_use]
    pub fn to_record(&self) -> TradeRecord {
        TradeRecord::new(
            parse_decimal_or_zero(self.price.as_deref()),
            parse_decimal_or_zero(self.quantity.as_deref()),
            self.trade_time.unwrap_or(0),
        )
    }
}

fn parse_decimal_or_zero(value: Option<&str>) -> f64 {
    value.and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0)
}

// =============================================================================
// Stream
// =============================================================================

/// `aggTrade` stream event payload.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamAggTrade {
    /// Event type, `aggTrade`.
    #[serde(rename = "e")]
    pub event_type: String,
    /// Event time in milliseconds.
    #[serde(rename = "E")]
    pub event_time: i64,
    /// Symbol, uppercase.
    #[serde(rename = "s")]
    pub symbol: String,
    /// Aggregate trade id.
    #[serde(rename = "a")]
    pub id: u64,
    /// Price as a decimal string.
    #[serde(rename = "p")]
    pub price: String,
    /// Quantity as a decimal string.
    #[serde(rename = "q")]
    pub quantity: String,
    /// Trade time in milliseconds.
    #[serde(rename = "T")]
    pub trade_time: i64,
    /// Whether the buyer was the maker.
    #[serde(rename = "m")]
    pub buyer_is_maker: bool,
}

impl StreamAggTrade {
    /// Convert into a routed inbound message.
    ///
    /// # Errors
    ///
    /// Returns a description if price or quantity is not a number.
    pub fn to_inbound(&self) -> Result<InboundMessage, String> {
        let price = self
            .price
            .parse::<f64>()
            .map_err(|e| format!("invalid price '{}': {e}", self.price))?;
        let quantity = self
            .quantity
            .parse::<f64>()
            .map_err(|e| format!("invalid quantity '{}': {e}", self.quantity))?;

        Ok(InboundMessage {
            symbol: self.symbol.clone(),
            record: TradeRecord::new(price, quantity, self.trade_time),
        })
    }
}

/// Combined-stream data frame.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamEnvelope {
    /// Stream name, e.g. `btcusdt@aggTrade`.
    pub stream: String,
    /// Event payload.
    pub data: serde_json::Value,
}

/// Error body of a rejected control request.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StreamApiError {
    /// Binance error code.
    pub code: i64,
    /// Error description.
    pub msg: String,
}

/// Reply to a SUBSCRIBE/UNSUBSCRIBE request.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamResponse {
    /// Request id being answered.
    pub id: Option<u64>,
    /// `null` on success.
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    /// Present when the request was rejected.
    #[serde(default)]
    pub error: Option<StreamApiError>,
    /// Flat error code, used by some gateway versions.
    #[serde(default)]
    pub code: Option<i64>,
    /// Flat error message, used by some gateway versions.
    #[serde(default)]
    pub msg: Option<String>,
}

impl StreamResponse {
    /// Rejection reason, if the request failed.
    #[must_use]
    pub fn rejection(&self) -> Option<String> {
        if let Some(err) = &self.error {
            return Some(format!("{} (code {})", err.msg, err.code));
        }
        match (&self.msg, self.code) {
            (Some(msg), Some(code)) => Some(format!("{msg} (code {code})")),
            (Some(msg), None) => Some(msg.clone()),
            (None, Some(code)) => Some(format!("code {code}")),
            (None, None) => None,
        }
    }
}

/// Any text frame received on the combined stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum InboundFrame {
    /// Market data.
    Data(StreamEnvelope),
    /// Control reply.
    Response(StreamResponse),
}

/// Decode a text frame.
///
/// # Errors
///
/// Returns the JSON error if the frame is neither a data frame nor a
/// control reply.
pub fn decode_frame(text: &str) -> Result<InboundFrame, serde_json::Error> {
    serde_json::from_str(text)
}

/// Control request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StreamMethod {
    /// Start delivering streams.
    Subscribe,
    /// Stop delivering streams.
    Unsubscribe,
}

/// SUBSCRIBE/UNSUBSCRIBE request.
#[derive(Debug, Clone, Serialize)]
pub struct StreamRequest {
    /// Request method.
    pub method: StreamMethod,
    /// Stream names.
    pub params: Vec<String>,
    /// Correlation id echoed in the reply.
    pub id: u64,
}

impl StreamRequest {
    /// Subscribe request.
    #[must_use]
    pub const fn subscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: StreamMethod::Subscribe,
            params,
            id,
        }
    }

    /// Unsubscribe request.
    #[must_use]
    pub const fn unsubscribe(params: Vec<String>, id: u64) -> Self {
        Self {
            method: StreamMethod::Unsubscribe,
            params,
            id,
        }
    }

    /// Encode as JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// =============================================================================
// Tests
// =============================================================================
