//! Historical backfill end to end: ingester, loop and publisher together.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use trades_ingest::{
    BinanceRestClient, BinanceRestConfig, BroadcastPublisher, FetchError, HistoricalIngester,
    IngestionLoop, PublishedTrade, TradeHistorySource, TradeRecord,
};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path, query_param},
};

const DAY_MS: i64 = 86_400_000;
const HOUR_MS: i64 = 3_600_000;
const WINDOW_END: i64 = 1_732_636_800_000;
const RANGE_START: i64 = WINDOW_END - DAY_MS;

/// Serves a fixed trade tape per symbol, honoring the window and limit.
#[derive(Clone, Default)]
struct TapeSource {
    tapes: Arc<HashMap<String, Vec<TradeRecord>>>,
    calls: Arc<Mutex<Vec<(String, i64, i64)>>>,
}

impl TapeSource {
    fn new(tapes: HashMap<String, Vec<TradeRecord>>) -> Self {
        Self {
            tapes: Arc::new(tapes),
            calls: Arc::default(),
        }
    }
}

#[async_trait]
impl TradeHistorySource for TapeSource {
    async fn fetch(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
        limit: u32,
    ) -> Result<Vec<TradeRecord>, FetchError> {
        self.calls.lock().push((symbol.to_string(), start_ms, end_ms));
        let page = self
            .tapes
            .get(symbol)
            .map(|tape| {
                tape.iter()
                    .filter(|r| start_ms <= r.event_time_ms && r.event_time_ms < end_ms)
                    .take(limit as usize)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        Ok(page)
    }
}

fn drain(rx: &mut tokio::sync::broadcast::Receiver<PublishedTrade>) -> Vec<PublishedTrade> {
    let mut out = Vec::new();
    while let Ok(trade) = rx.try_recv() {
        out.push(trade);
    }
    out
}

#[tokio::test(start_paused = true)]
async fn backfills_every_symbol_and_finishes() {
    let tape_a = vec![
        TradeRecord::new(100.0, 1.0, RANGE_START + 1_000),
        TradeRecord::new(101.0, 2.0, RANGE_START + 2_000),
        TradeRecord::new(102.0, 3.0, RANGE_START + 5 * HOUR_MS + 17),
    ];
    let source = TapeSource::new(HashMap::from([("AUSDT".to_string(), tape_a)]));
    let calls = Arc::clone(&source.calls);

    let ingester =
        HistoricalIngester::with_window_end(&["ausdt", "BUSDT"], 1, WINDOW_END, source);
    let publisher = BroadcastPublisher::new("trades", 1024);
    let mut rx = publisher.subscribe();

    let summary = IngestionLoop::new(Box::new(ingester), publisher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert!(summary.completed);
    assert_eq!(summary.trades_published, 3);

    let published = drain(&mut rx);
    assert_eq!(published.len(), 3);
    assert!(published.iter().all(|p| p.key == "AUSDT" && p.topic == "trades"));
    let times: Vec<i64> = published.iter().map(|p| p.trade.event_time_ms()).collect();
    assert_eq!(
        times,
        vec![RANGE_START + 1_000, RANGE_START + 2_000, RANGE_START + 5 * HOUR_MS + 17]
    );

    let calls = calls.lock();
    for symbol in ["AUSDT", "BUSDT"] {
        let windows: Vec<(i64, i64)> = calls
            .iter()
            .filter(|(s, _, _)| s == symbol)
            .map(|(_, start, end)| (*start, *end))
            .collect();

        assert_eq!(windows.first().unwrap().0, RANGE_START);
        assert_eq!(windows.last().unwrap().1, WINDOW_END);
        for (start, end) in &windows {
            assert!(end - start <= HOUR_MS);
            assert!(start < end);
        }
        for pair in windows.windows(2) {
            assert!(pair[1].0 > pair[0].0, "{symbol} cursor moved backwards");
        }
    }

    // B never has data: one call per hour of the day.
    assert_eq!(calls.iter().filter(|(s, _, _)| s == "BUSDT").count(), 24);
    // A's windows restart just past each trade it finds, adding one call.
    assert_eq!(calls.iter().filter(|(s, _, _)| s == "AUSDT").count(), 25);
}

#[tokio::test(start_paused = true)]
async fn symbols_are_visited_round_robin() {
    let source = TapeSource::default();
    let calls = Arc::clone(&source.calls);

    let ingester = HistoricalIngester::with_window_end(&["A", "B", "C"], 1, WINDOW_END, source);
    IngestionLoop::new(
        Box::new(ingester),
        BroadcastPublisher::new("trades", 16),
        CancellationToken::new(),
    )
    .run()
    .await
    .unwrap();

    let order: Vec<String> = calls.lock().iter().take(6).map(|c| c.0.clone()).collect();
    assert_eq!(order, vec!["A", "B", "C", "A", "B", "C"]);
}

#[tokio::test(start_paused = true)]
async fn cancelled_backfill_reports_incomplete() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let ingester =
        HistoricalIngester::with_window_end(&["A"], 1, WINDOW_END, TapeSource::default());
    let summary = IngestionLoop::new(
        Box::new(ingester),
        BroadcastPublisher::new("trades", 16),
        cancel,
    )
    .run()
    .await
    .unwrap();

    assert!(!summary.completed);
    assert_eq!(summary.trades_published, 0);
}

#[tokio::test]
async fn backfill_over_rest_client() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/fapi/v1/aggTrades"))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("startTime", RANGE_START.to_string()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"a": 1, "p": "97500.5", "q": "0.1", "T": RANGE_START + 10, "m": true},
            {"a": 2, "p": "97501.0", "q": "0.2", "T": RANGE_START + 20, "m": false}
        ])))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/fapi/v1/aggTrades"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    let client = BinanceRestClient::new(BinanceRestConfig {
        base_url: server.uri(),
        timeout: Duration::from_secs(5),
        ..BinanceRestConfig::default()
    })
    .unwrap();

    let ingester = HistoricalIngester::with_window_end(&["btcusdt"], 1, WINDOW_END, client);
    let publisher = BroadcastPublisher::new("trades", 64);
    let mut rx = publisher.subscribe();

    let summary = IngestionLoop::new(Box::new(ingester), publisher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert!(summary.completed);
    let published = drain(&mut rx);
    assert_eq!(published.len(), 2);
    assert_eq!(published[0].key, "BTCUSDT");
    assert_eq!(published[0].trade.event_time_ms(), RANGE_START + 10);
    assert!((published[1].trade.price() - 97_501.0).abs() < 1e-9);
}
