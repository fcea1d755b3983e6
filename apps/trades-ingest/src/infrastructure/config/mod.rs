//! Configuration Module
//!
//! Environment-driven configuration for the ingestion service.

mod settings;

pub use settings::{
    ConfigError, Credentials, DEFAULT_SYMBOLS, IngestConfig, RestSettings, ServerSettings,
    WebSocketSettings,
};
