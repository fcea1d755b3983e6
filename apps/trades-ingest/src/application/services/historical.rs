//! Historical Backfill Ingester
//!
//! Walks every configured symbol from `now - N days` up to a fixed end time
//! in one-hour chunks, one REST page per call, visiting symbols round-robin.
//!
//! # Failure Policy
//!
//! | Source result | Sleep                     | Cursor        | Failure streak |
//! |---------------|---------------------------|---------------|----------------|
//! | empty page    | none                      | sub-window end| reset          |
//! | records       | none                      | last time + 1 | reset          |
//! | rate limited  | 60s                       | unchanged     | unchanged      |
//! | banned        | 120s                      | unchanged     | unchanged      |
//! | other error   | `min(2^failures, 60)` s   | unchanged     | +1             |
//!
//! Sleeps run to completion; cancellation is only observed between batches.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::application::metrics;
use crate::application::ports::{FetchError, Ingester, TradeHistorySource, TradeRecord};
use crate::domain::cursor::{CursorBook, SymbolCursor};
use crate::domain::mode::IngestionMode;
use crate::domain::trade::Trade;

// =============================================================================
// Constants
// =============================================================================

/// Width of one fetch sub-window.
pub const CHUNK_MS: i64 = 3_600_000;

/// Records requested per page.
pub const PAGE_LIMIT: u32 = 1000;

/// Sleep after a rate-limit response.
pub const RATE_LIMIT_COOLDOWN: Duration = Duration::from_secs(60);

/// Sleep after a ban response.
pub const BAN_COOLDOWN: Duration = Duration::from_secs(120);

/// Upper bound on transient-error backoff.
pub const MAX_BACKOFF: Duration = Duration::from_secs(60);

const DAY_MS: i64 = 86_400_000;

/// Backoff before retrying after `consecutive_failures` transient errors:
/// `min(2^consecutive_failures, 60)` seconds.
#[must_use]
pub fn backoff_delay(consecutive_failures: u32) -> Duration {
    let secs = 2_u64
        .checked_pow(consecutive_failures)
        .unwrap_or(u64::MAX)
        .min(MAX_BACKOFF.as_secs());
    Duration::from_secs(secs)
}

// =============================================================================
// Historical Ingester
// =============================================================================

/// Round-robin REST paginator over a fixed past range.
pub struct HistoricalIngester<S> {
    source: S,
    book: CursorBook,
    range_start_ms: i64,
    done: bool,
}

impl<S: TradeHistorySource> HistoricalIngester<S> {
    /// Backfill the last `last_n_days` days, ending now.
    pub fn new<T: AsRef<str>>(symbols: &[T], last_n_days: u32, source: S) -> Self {
        Self::with_window_end(symbols, last_n_days, Utc::now().timestamp_millis(), source)
    }

    /// Backfill the `last_n_days` days before `window_end_ms`.
    ///
    /// Symbols are uppercased; order is preserved.
    pub fn with_window_end<T: AsRef<str>>(
        symbols: &[T],
        last_n_days: u32,
        window_end_ms: i64,
        source: S,
    ) -> Self {
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.as_ref().trim().to_uppercase())
            .collect();
        let range_start_ms =
            window_end_ms.saturating_sub(i64::from(last_n_days).saturating_mul(DAY_MS));

        tracing::info!(
            symbols = ?symbols,
            last_n_days,
            range_start_ms,
            window_end_ms,
            "Historical backfill configured"
        );

        Self {
            source,
            book: CursorBook::new(&symbols, range_start_ms, window_end_ms),
            range_start_ms,
            done: false,
        }
    }

    /// Every symbol's cursor, in configuration order.
    #[must_use]
    pub fn cursors(&self) -> &[SymbolCursor] {
        self.book.cursors()
    }

    /// Cursor for one symbol.
    #[must_use]
    pub fn cursor(&self, symbol: &str) -> Option<&SymbolCursor> {
        self.book.by_symbol(symbol)
    }

    /// Start of the backfill range.
    #[must_use]
    pub const fn range_start_ms(&self) -> i64 {
        self.range_start_ms
    }

    /// Fetch one page for the next eligible symbol.
    pub async fn fetch_next(&mut self) -> Vec<Trade> {
        if self.done {
            return Vec::new();
        }

        let Some(index) = self.book.next_eligible() else {
            self.done = true;
            tracing::info!(symbols = self.book.len(), "Historical backfill complete");
            return Vec::new();
        };

        let Some(cursor) = self.book.get(index) else {
            return Vec::new();
        };
        let symbol = cursor.symbol().to_string();
        let (start_ms, end_ms) = cursor.fetch_window(CHUNK_MS);

        let started = Instant::now();
        let result = self
            .source
            .fetch(&symbol, start_ms, end_ms, PAGE_LIMIT)
            .await;
        metrics::record_fetch_duration(started.elapsed());

        match result {
            Ok(records) => self.apply_page(index, &symbol, end_ms, &records),
            Err(err) => {
                metrics::record_fetch_error(err.kind());
                self.handle_error(index, &symbol, err).await;
                Vec::new()
            }
        }
    }

    fn apply_page(
        &mut self,
        index: usize,
        symbol: &str,
        sub_window_end_ms: i64,
        records: &[TradeRecord],
    ) -> Vec<Trade> {
        let range_start_ms = self.range_start_ms;
        let Some(cursor) = self.book.get_mut(index) else {
            return Vec::new();
        };
        cursor.record_success();

        let Some(last) = records.last() else {
            cursor.advance_to(sub_window_end_ms);
            metrics::set_backfill_progress(symbol, cursor.progress(range_start_ms));
            tracing::debug!(
                symbol,
                position_ms = cursor.window_start_ms(),
                "Empty page, skipping sub-window"
            );
            return Vec::new();
        };

        if !cursor.advance_to(last.event_time_ms.saturating_add(1)) {
            tracing::warn!(
                symbol,
                last_time_ms = last.event_time_ms,
                position_ms = cursor.window_start_ms(),
                "Page did not move cursor forward, skipping to sub-window end"
            );
            cursor.advance_to(sub_window_end_ms);
        }
        metrics::set_backfill_progress(symbol, cursor.progress(range_start_ms));

        let trades: Vec<Trade> = records
            .iter()
            .filter_map(|r| match Trade::new(symbol, r.price, r.quantity, r.event_time_ms) {
                Ok(trade) => Some(trade),
                Err(e) => {
                    tracing::warn!(symbol, time_ms = r.event_time_ms, error = %e, "Skipping bad record");
                    None
                }
            })
            .collect();

        metrics::record_trades_fetched(symbol, trades.len() as u64);
        tracing::debug!(
            symbol,
            count = trades.len(),
            position_ms = cursor.window_start_ms(),
            "Fetched page"
        );
        trades
    }

    async fn handle_error(&mut self, index: usize, symbol: &str, err: FetchError) {
        match err {
            FetchError::RateLimited { retry_after } => {
                tracing::warn!(
                    symbol,
                    advised = ?retry_after,
                    cooldown_secs = RATE_LIMIT_COOLDOWN.as_secs(),
                    "Rate limited, cooling down"
                );
                tokio::time::sleep(RATE_LIMIT_COOLDOWN).await;
            }
            FetchError::Banned { retry_after } => {
                tracing::error!(
                    symbol,
                    advised = ?retry_after,
                    cooldown_secs = BAN_COOLDOWN.as_secs(),
                    "Banned by exchange, cooling down"
                );
                tokio::time::sleep(BAN_COOLDOWN).await;
            }
            other => {
                let failures = self
                    .book
                    .get(index)
                    .map_or(0, SymbolCursor::consecutive_failures);
                let delay = backoff_delay(failures);
                tracing::warn!(
                    symbol,
                    error = %other,
                    consecutive_failures = failures,
                    backoff_secs = delay.as_secs(),
                    "Fetch failed, backing off"
                );
                tokio::time::sleep(delay).await;
                if let Some(cursor) = self.book.get_mut(index) {
                    cursor.record_failure();
                }
            }
        }
    }
}

#[async_trait]
impl<S: TradeHistorySource> Ingester for HistoricalIngester<S> {
    fn mode(&self) -> IngestionMode {
        IngestionMode::Historical
    }

    async fn next_batch(&mut self, _cancel: &CancellationToken) -> Vec<Trade> {
        self.fetch_next().await
    }

    fn is_done(&self) -> bool {
        self.done
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Arc;

    use parking_lot::Mutex;
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    const END: i64 = 1_732_636_800_000;

    type Script = Arc<Mutex<VecDeque<Result<Vec<TradeRecord>, FetchError>>>>;
    type Calls = Arc<Mutex<Vec<(String, i64, i64)>>>;

    /// Replays scripted results; empty pages once the script runs out.
    #[derive(Clone, Default)]
    struct ScriptedSource {
        script: Script,
        calls: Calls,
    }

    impl ScriptedSource {
        fn push(&self, result: Result<Vec<TradeRecord>, FetchError>) {
            self.script.lock().push_back(result);
        }
    }

    #[async_trait]
    impl TradeHistorySource for ScriptedSource {
        async fn fetch(
            &self,
            symbol: &str,
            start_ms: i64,
            end_ms: i64,
            _limit: u32,
        ) -> Result<Vec<TradeRecord>, FetchError> {
            self.calls.lock().push((symbol.to_string(), start_ms, end_ms));
            self.script.lock().pop_front().unwrap_or(Ok(Vec::new()))
        }
    }

    fn elapsed_about(since: tokio::time::Instant, expected: Duration) -> bool {
        let elapsed = since.elapsed();
        elapsed >= expected && elapsed < expected + Duration::from_millis(50)
    }

    fn ingester(symbols: &[&str], source: ScriptedSource) -> HistoricalIngester<ScriptedSource> {
        HistoricalIngester::with_window_end(symbols, 1, END, source)
    }

    #[test_case(0, 1)]
    #[test_case(1, 2)]
    #[test_case(5, 32)]
    #[test_case(6, 60)]
    #[test_case(40, 60)]
    #[test_case(u32::MAX, 60)]
    fn backoff_table(failures: u32, secs: u64) {
        assert_eq!(backoff_delay(failures), Duration::from_secs(secs));
    }

    proptest! {
        #[test]
        fn backoff_is_capped(failures in 6_u32..) {
            prop_assert_eq!(backoff_delay(failures), MAX_BACKOFF);
        }
    }

    #[test]
    fn symbols_are_uppercased_and_start_n_days_back() {
        let ing = ingester(&["btcusdt", "EthUsdt"], ScriptedSource::default());
        let symbols: Vec<&str> = ing.cursors().iter().map(SymbolCursor::symbol).collect();
        assert_eq!(symbols, vec!["BTCUSDT", "ETHUSDT"]);
        assert_eq!(ing.range_start_ms(), END - DAY_MS);
        assert!(ing.cursors().iter().all(|c| c.window_end_ms() == END));
    }

    #[tokio::test]
    async fn page_advances_cursor_past_last_record() {
        let source = ScriptedSource::default();
        let start = END - DAY_MS;
        source.push(Ok(vec![
            TradeRecord::new(100.0, 1.0, start + 10),
            TradeRecord::new(101.0, 2.0, start + 20),
        ]));
        let mut ing = ingester(&["BTCUSDT"], source.clone());

        let batch = ing.fetch_next().await;

        assert_eq!(batch.len(), 2);
        assert_eq!(ing.cursor("BTCUSDT").unwrap().window_start_ms(), start + 21);
        assert_eq!(
            source.calls.lock()[0],
            ("BTCUSDT".to_string(), start, start + CHUNK_MS)
        );
    }

    #[tokio::test]
    async fn empty_page_skips_sub_window() {
        let mut ing = ingester(&["BTCUSDT"], ScriptedSource::default());
        let start = ing.range_start_ms();

        assert!(ing.fetch_next().await.is_empty());
        assert_eq!(
            ing.cursor("BTCUSDT").unwrap().window_start_ms(),
            start + CHUNK_MS
        );
    }

    /// Runs two transient failures, then `cooldown_error`, then one more
    /// transient failure. Returns the ingester after the cooldown call, the
    /// cursor before it and the time it took.
    async fn streak_around_cooldown(
        cooldown_error: FetchError,
    ) -> (HistoricalIngester<ScriptedSource>, SymbolCursor, Duration) {
        let source = ScriptedSource::default();
        source.push(Err(FetchError::Network("reset".into())));
        source.push(Err(FetchError::Network("reset".into())));
        source.push(Err(cooldown_error));
        source.push(Err(FetchError::Network("reset".into())));
        let mut ing = ingester(&["BTCUSDT"], source);

        ing.fetch_next().await;
        ing.fetch_next().await;
        let before = ing.cursor("BTCUSDT").unwrap().clone();
        assert_eq!(before.consecutive_failures(), 2);

        let started = tokio::time::Instant::now();
        assert!(ing.fetch_next().await.is_empty());

        (ing, before, started.elapsed())
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_sleeps_and_keeps_cursor_and_streak() {
        let (mut ing, before, took) = streak_around_cooldown(FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(3600)),
        })
        .await;

        assert!(took >= RATE_LIMIT_COOLDOWN);
        assert!(took < RATE_LIMIT_COOLDOWN + Duration::from_millis(50));
        assert_eq!(ing.cursor("BTCUSDT").unwrap(), &before);

        // The streak carried over: the next transient error backs off 2^2 s.
        let t0 = tokio::time::Instant::now();
        ing.fetch_next().await;
        assert!(elapsed_about(t0, Duration::from_secs(4)));
        assert_eq!(ing.cursor("BTCUSDT").unwrap().consecutive_failures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn ban_sleeps_longer_and_keeps_cursor_and_streak() {
        let (mut ing, before, took) =
            streak_around_cooldown(FetchError::Banned { retry_after: None }).await;

        assert!(took >= BAN_COOLDOWN);
        assert!(took < BAN_COOLDOWN + Duration::from_millis(50));
        assert_eq!(ing.cursor("BTCUSDT").unwrap(), &before);

        let t0 = tokio::time::Instant::now();
        ing.fetch_next().await;
        assert!(elapsed_about(t0, Duration::from_secs(4)));
        assert_eq!(ing.cursor("BTCUSDT").unwrap().consecutive_failures(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_back_off_exponentially() {
        let source = ScriptedSource::default();
        for _ in 0..3 {
            source.push(Err(FetchError::Network("reset".into())));
        }
        let mut ing = ingester(&["BTCUSDT"], source);
        let start = ing.range_start_ms();

        for expected in [1, 2, 4] {
            let t0 = tokio::time::Instant::now();
            ing.fetch_next().await;
            assert!(elapsed_about(t0, Duration::from_secs(expected)));
        }

        let cursor = ing.cursor("BTCUSDT").unwrap();
        assert_eq!(cursor.consecutive_failures(), 3);
        assert_eq!(cursor.window_start_ms(), start);

        // Script exhausted: next call succeeds and clears the streak.
        ing.fetch_next().await;
        assert_eq!(ing.cursor("BTCUSDT").unwrap().consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn failure_streak_is_per_symbol() {
        let source = ScriptedSource::default();
        source.push(Err(FetchError::Http {
            status: 500,
            message: "boom".into(),
        }));
        let mut ing = ingester(&["AAA", "BBB"], source);

        ing.fetch_next().await;
        ing.fetch_next().await;

        assert_eq!(ing.cursor("AAA").unwrap().consecutive_failures(), 1);
        assert_eq!(ing.cursor("BBB").unwrap().consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn stale_page_still_makes_progress() {
        let source = ScriptedSource::default();
        source.push(Ok(vec![TradeRecord::new(1.0, 1.0, 0)]));
        let mut ing = ingester(&["BTCUSDT"], source);
        let start = ing.range_start_ms();

        let batch = ing.fetch_next().await;

        assert_eq!(batch.len(), 1);
        assert_eq!(
            ing.cursor("BTCUSDT").unwrap().window_start_ms(),
            start + CHUNK_MS
        );
    }

    #[tokio::test]
    async fn out_of_range_record_is_skipped_but_cursor_moves() {
        let source = ScriptedSource::default();
        let start = END - DAY_MS;
        source.push(Ok(vec![
            TradeRecord::new(1.0, 1.0, start + 5),
            TradeRecord::new(1.0, 1.0, i64::MAX - 1),
        ]));
        let mut ing = ingester(&["BTCUSDT"], source);

        let batch = ing.fetch_next().await;

        assert_eq!(batch.len(), 1);
        let cursor = ing.cursor("BTCUSDT").unwrap();
        assert_eq!(cursor.window_start_ms(), END);
        assert!(cursor.is_exhausted());
    }

    #[tokio::test]
    async fn done_after_every_symbol_exhausted() {
        let mut ing = HistoricalIngester::with_window_end(
            &["AAA", "BBB"],
            1,
            END,
            ScriptedSource::default(),
        );
        let cancel = CancellationToken::new();

        // 24 empty chunks per symbol, then one call to observe exhaustion.
        for _ in 0..48 {
            assert!(!ing.is_done());
            ing.next_batch(&cancel).await;
        }
        assert!(ing.cursors().iter().all(SymbolCursor::is_exhausted));
        assert!(!ing.is_done());

        assert!(ing.next_batch(&cancel).await.is_empty());
        assert!(ing.is_done());
        assert!(ing.next_batch(&cancel).await.is_empty());
        assert!(ing.is_done());
    }
}
