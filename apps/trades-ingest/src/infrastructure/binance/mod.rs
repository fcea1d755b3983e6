//! Binance Adapters
//!
//! Concrete data sources for Binance USD-M futures:
//!
//! - **REST**: `aggTrades` history pages for backfill
//! - **Stream**: combined-stream WebSocket for live `aggTrade` events

pub mod messages;
pub mod reconnect;
pub mod rest;
pub mod stream;

pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use rest::{BinanceRestClient, BinanceRestConfig, DEFAULT_REST_BASE_URL};
pub use stream::{
    BinanceConnection, BinanceStreamConfig, BinanceStreamSource, BinanceSubscription,
    DEFAULT_STREAM_URL, StreamStatus, StreamStatusSnapshot,
};
