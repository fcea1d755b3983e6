//! REST `aggTrades` client against a mock HTTP server.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::time::Duration;

use serde_json::json;
use trades_ingest::{BinanceRestClient, BinanceRestConfig, FetchError, TradeHistorySource};
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

const AGG_TRADES: &str = "/fapi/v1/aggTrades";

async fn setup(api_key: Option<&str>) -> (MockServer, BinanceRestClient) {
    let mock_server = MockServer::start().await;
    let config = BinanceRestConfig {
        base_url: mock_server.uri(),
        timeout: Duration::from_secs(5),
        retries: 2,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        api_key: api_key.map(ToString::to_string),
    };
    (mock_server, BinanceRestClient::new(config).unwrap())
}

fn page() -> serde_json::Value {
    json!([
        {"a": 1, "p": "97500.10", "q": "0.010", "f": 10, "l": 10, "T": 1_732_636_800_000_i64, "m": true},
        {"a": 2, "p": "97501.00", "q": "0.250", "f": 11, "l": 12, "T": 1_732_636_800_500_i64, "m": false}
    ])
}

#[tokio::test]
async fn maps_half_open_window_to_inclusive_end_time() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .and(query_param("symbol", "BTCUSDT"))
        .and(query_param("startTime", "1732636800000"))
        .and(query_param("endTime", "1732640399999"))
        .and(query_param("limit", "1000"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page()))
        .expect(1)
        .mount(&server)
        .await;

    let records = client
        .fetch("btcusdt", 1_732_636_800_000, 1_732_640_400_000, 1000)
        .await
        .unwrap();

    assert_eq!(records.len(), 2);
    assert!((records[0].price - 97_500.10).abs() < 1e-9);
    assert!((records[0].quantity - 0.010).abs() < 1e-12);
    assert_eq!(records[0].event_time_ms, 1_732_636_800_000);
    assert_eq!(records[1].event_time_ms, 1_732_636_800_500);
}

#[tokio::test]
async fn empty_window_skips_the_request() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(page()))
        .expect(0)
        .mount(&server)
        .await;

    let records = client.fetch("BTCUSDT", 5_000, 5_000, 1000).await.unwrap();
    assert!(records.is_empty());
}

#[tokio::test]
async fn rate_limit_carries_retry_after_and_is_not_retried() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "17"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.fetch("BTCUSDT", 0, 1_000, 1000).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::RateLimited {
            retry_after: Some(Duration::from_secs(17))
        }
    );
}

#[tokio::test]
async fn teapot_means_banned() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .respond_with(ResponseTemplate::new(418))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.fetch("BTCUSDT", 0, 1_000, 1000).await.unwrap_err();
    assert_eq!(err, FetchError::Banned { retry_after: None });
}

#[tokio::test]
async fn server_error_is_retried_until_success() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(2)
        .expect(2)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .respond_with(ResponseTemplate::new(200).set_body_json(page()))
        .expect(1)
        .mount(&server)
        .await;

    let records = client.fetch("BTCUSDT", 0, 1_000, 1000).await.unwrap();
    assert_eq!(records.len(), 2);
}

#[tokio::test]
async fn server_error_surfaces_after_retries_run_out() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(3)
        .mount(&server)
        .await;

    let err = client.fetch("BTCUSDT", 0, 1_000, 1000).await.unwrap_err();
    assert_eq!(
        err,
        FetchError::Http {
            status: 502,
            message: "bad gateway".to_string()
        }
    );
}

#[tokio::test]
async fn client_error_is_not_retried() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"code": -1121, "msg": "Invalid symbol."})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client.fetch("NOPE", 0, 1_000, 1000).await.unwrap_err();
    match err {
        FetchError::Http { status, message } => {
            assert_eq!(status, 400);
            assert!(message.contains("Invalid symbol."));
        }
        other => panic!("expected Http error, got {other:?}"),
    }
}

#[tokio::test]
async fn unexpected_body_is_a_decode_error() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"trades": []})))
        .mount(&server)
        .await;

    let err = client.fetch("BTCUSDT", 0, 1_000, 1000).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)));
}

#[tokio::test]
async fn missing_fields_normalize_to_zero() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!([{"a": 7, "p": "not-a-number"}])),
        )
        .mount(&server)
        .await;

    let records = client.fetch("BTCUSDT", 0, 1_000, 1000).await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].price.abs() < f64::EPSILON);
    assert!(records[0].quantity.abs() < f64::EPSILON);
    assert_eq!(records[0].event_time_ms, 0);
}

#[tokio::test]
async fn api_key_is_sent_when_configured() {
    let (server, client) = setup(Some("key123")).await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .and(header("X-MBX-APIKEY", "key123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    assert!(client.fetch("BTCUSDT", 0, 1_000, 1000).await.unwrap().is_empty());
}

#[tokio::test]
async fn no_api_key_header_without_credentials() {
    let (server, client) = setup(None).await;

    Mock::given(method("GET"))
        .and(path(AGG_TRADES))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    client.fetch("BTCUSDT", 0, 1_000, 1000).await.unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].headers.get("x-mbx-apikey").is_none());
}
