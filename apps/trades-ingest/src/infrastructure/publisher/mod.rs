//! Trade Publishers
//!
//! Adapters for the [`TradePublisher`](crate::application::ports::TradePublisher)
//! port:
//!
//! - `JsonLinesPublisher`: one JSON envelope per line on any writer (stdout
//!   in production, for piping into a broker producer)
//! - `BroadcastPublisher`: in-process fan-out over a tokio broadcast channel

mod broadcast;
mod json_lines;

pub use broadcast::{BroadcastPublisher, PublishedTrade};
pub use json_lines::JsonLinesPublisher;
