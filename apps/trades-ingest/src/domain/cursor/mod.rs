//! Backfill Cursors
//!
//! Per-symbol bookmarks of historical ingestion progress, and the book that
//! owns them and hands out symbols in round-robin order.
//!
//! # Design
//!
//! Cursors live in a `Vec` in configuration order with a symbol→index map on
//! the side. Only the historical ingester holds a `CursorBook`, so there is
//! no interior mutability and no sharing across tasks.

use std::collections::HashMap;

// =============================================================================
// Symbol Cursor
// =============================================================================

/// Ingestion progress for one symbol over `[window_start_ms, window_end_ms)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolCursor {
    symbol: String,
    window_start_ms: i64,
    window_end_ms: i64,
    consecutive_failures: u32,
}

impl SymbolCursor {
    /// Create a cursor positioned at `window_start_ms`.
    #[must_use]
    pub fn new(symbol: impl Into<String>, window_start_ms: i64, window_end_ms: i64) -> Self {
        Self {
            symbol: symbol.into(),
            window_start_ms: window_start_ms.min(window_end_ms),
            window_end_ms,
            consecutive_failures: 0,
        }
    }

    /// Symbol this cursor tracks.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Next unread millisecond.
    #[must_use]
    pub const fn window_start_ms(&self) -> i64 {
        self.window_start_ms
    }

    /// Fixed end of the backfill range (exclusive).
    #[must_use]
    pub const fn window_end_ms(&self) -> i64 {
        self.window_end_ms
    }

    /// Failed fetches since the last success.
    #[must_use]
    pub const fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Whether the whole range has been read.
    #[must_use]
    pub const fn is_exhausted(&self) -> bool {
        self.window_start_ms >= self.window_end_ms
    }

    /// Next fetch window: `[start, min(start + chunk_ms, end))`.
    #[must_use]
    pub fn fetch_window(&self, chunk_ms: i64) -> (i64, i64) {
        let end = self
            .window_start_ms
            .saturating_add(chunk_ms)
            .min(self.window_end_ms);
        (self.window_start_ms, end)
    }

    /// Move the cursor forward to `position_ms`.
    ///
    /// Never moves backwards and never passes `window_end_ms`. Returns `true`
    /// if the cursor actually moved.
    pub fn advance_to(&mut self, position_ms: i64) -> bool {
        let target = position_ms.min(self.window_end_ms);
        if target > self.window_start_ms {
            self.window_start_ms = target;
            true
        } else {
            false
        }
    }

    /// Clear the failure streak after a successful fetch.
    pub const fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Extend the failure streak after a transient error.
    pub const fn record_failure(&mut self) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
    }

    /// Fraction of the range already read, in `[0.0, 1.0]`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn progress(&self, range_start_ms: i64) -> f64 {
        let total = self.window_end_ms.saturating_sub(range_start_ms);
        if total <= 0 {
            return 1.0;
        }
        let done = self.window_start_ms.saturating_sub(range_start_ms);
        (done as f64 / total as f64).clamp(0.0, 1.0)
    }
}

// =============================================================================
// Cursor Book
// =============================================================================

/// Owns every symbol's cursor and schedules them round-robin.
#[derive(Debug, Clone)]
pub struct CursorBook {
    cursors: Vec<SymbolCursor>,
    index: HashMap<String, usize>,
    next_index: usize,
}

impl CursorBook {
    /// Create a book with every symbol starting at `start_ms`.
    ///
    /// Symbol order is preserved; a repeated symbol gets its own cursor but
    /// the index map points at its first occurrence.
    #[must_use]
    pub fn new<S: AsRef<str>>(symbols: &[S], start_ms: i64, end_ms: i64) -> Self {
        let cursors: Vec<SymbolCursor> = symbols
            .iter()
            .map(|s| SymbolCursor::new(s.as_ref(), start_ms, end_ms))
            .collect();

        let mut index = HashMap::with_capacity(cursors.len());
        for (i, cursor) in cursors.iter().enumerate() {
            index.entry(cursor.symbol.clone()).or_insert(i);
        }

        Self {
            cursors,
            index,
            next_index: 0,
        }
    }

    /// Pick the next non-exhausted cursor, starting after the last one used.
    ///
    /// Returns `None` once a full rotation finds nothing left to read.
    pub fn next_eligible(&mut self) -> Option<usize> {
        let len = self.cursors.len();
        for offset in 0..len {
            let i = (self.next_index + offset) % len;
            if !self.cursors[i].is_exhausted() {
                self.next_index = (i + 1) % len;
                return Some(i);
            }
        }
        None
    }

    /// Whether every cursor has reached the end of its range.
    #[must_use]
    pub fn all_exhausted(&self) -> bool {
        self.cursors.iter().all(SymbolCursor::is_exhausted)
    }

    /// Cursor by position.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&SymbolCursor> {
        self.cursors.get(index)
    }

    /// Mutable cursor by position.
    pub fn get_mut(&mut self, index: usize) -> Option<&mut SymbolCursor> {
        self.cursors.get_mut(index)
    }

    /// Cursor by symbol.
    #[must_use]
    pub fn by_symbol(&self, symbol: &str) -> Option<&SymbolCursor> {
        self.index.get(symbol).map(|&i| &self.cursors[i])
    }

    /// All cursors in configuration order.
    #[must_use]
    pub fn cursors(&self) -> &[SymbolCursor] {
        &self.cursors
    }

    /// Number of cursors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cursors.len()
    }

    /// Whether the book tracks no symbols.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cursors.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
