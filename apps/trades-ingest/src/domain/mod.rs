//! Domain Layer - Core ingestion types and business rules.
//!
//! Pure Rust types with no I/O: the canonical trade record, backfill
//! cursors, and the ingestion mode selector.

/// Backfill cursors and round-robin scheduling.
pub mod cursor;

/// Ingestion mode selector.
pub mod mode;

/// Canonical trade record and timestamp conversion.
pub mod trade;
