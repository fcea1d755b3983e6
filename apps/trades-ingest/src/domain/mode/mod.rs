//! Ingestion Mode
//!
//! The two mutually exclusive ways the service can pull trades.

use std::fmt;

use serde::Serialize;

/// Which ingestion strategy the process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestionMode {
    /// Streaming subscription, forwarding trades as they arrive.
    #[default]
    Live,
    /// Paginated REST backfill over a fixed past range.
    Historical,
}

impl IngestionMode {
    /// Parse a mode name, case-insensitively.
    ///
    /// Returns `None` for anything other than `live` or `historical`.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "live" => Some(Self::Live),
            "historical" => Some(Self::Historical),
            _ => None,
        }
    }

    /// Mode name as used in configuration and metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Live => "live",
            Self::Historical => "historical",
        }
    }
}

impl fmt::Display for IngestionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
