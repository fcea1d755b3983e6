//! Application Ports (Driver and Driven)
//!
//! Ports define interfaces for interacting with external systems.
//! - **Driver Ports** (Primary/Inbound): `Ingester`, the capability the loop drives
//! - **Driven Ports** (Secondary/Outbound): trade history and stream sources,
//!   and the trade publisher

mod ingester_port;
mod trade_history_port;
mod trade_publisher_port;
mod trade_stream_port;

pub use ingester_port::{IngestError, Ingester};
pub use trade_history_port::{FetchError, TradeHistorySource, TradeRecord};
#[cfg(test)]
pub use trade_publisher_port::MockTradePublisher;
pub use trade_publisher_port::{PublishError, TradePublisher};
pub use trade_stream_port::{
    InboundMessage, MalformedMessage, MessageHandler, StreamConnection, StreamError,
    StreamSubscription, TradeStreamSource,
};
