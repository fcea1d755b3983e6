//! Application Layer - Use cases and port definitions.
//!
//! This layer contains the ingestion services and the port interfaces
//! that define how they talk to exchanges and downstream sinks.

/// Metric names and recording helpers for the services.
pub mod metrics;

/// Port interfaces for data sources, publishers and ingesters.
pub mod ports;

/// Ingestion services: backfill, live streaming, queue and driver loop.
pub mod services;
