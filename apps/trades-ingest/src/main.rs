//! Trades Ingest Binary
//!
//! Runs one ingestion mode to completion (historical) or until a shutdown
//! signal (live). Published trades go to stdout as JSON lines; logs go to
//! stderr.
//!
//! # Usage
//!
//! ```bash
//! KAFKA_TOPIC_NAME=trades cargo run --bin trades-ingest | kcat -P -b localhost -t trades -K:
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `KAFKA_TOPIC_NAME`: Topic every trade is tagged with
//!
//! ## Optional
//! - `LIVE_OR_HISTORICAL`: live | historical (default: live)
//! - `TRADES_PRODUCT_IDS`: Comma-separated symbols (default: ten USDT perpetuals)
//! - `LAST_N_DAYS`: Historical range in days (default: 30)
//! - `TRADE_QUEUE_CAPACITY`: Live-mode queue size (default: 10000)
//! - `BINANCE_API_KEY`, `BINANCE_API_SECRET`: Optional credentials
//! - `BINANCE_REST_BASE_URL`, `BINANCE_STREAM_URL`: Endpoint overrides
//! - `REST_API_TIMEOUT_MS`, `REST_API_RETRIES`: REST client tuning
//! - `WEBSOCKET_RECONNECT_DELAY_MS`, `WEBSOCKET_RECONNECT_DELAY_MAX_SECS`: Reconnect backoff
//! - `TRADES_HEALTH_PORT`: Health check HTTP port (default: 8083, 0 disables)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log filter (default: `trades_ingest=info`)

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use trades_ingest::application::ports::Ingester;
use trades_ingest::infrastructure::binance::StreamStatus;
use trades_ingest::infrastructure::telemetry;
use trades_ingest::{
    BinanceRestClient, BinanceStreamSource, HealthServer, HealthServerState, HistoricalIngester,
    IngestConfig, IngestionLoop, IngestionMode, JsonLinesPublisher, LiveIngester, init_metrics,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting trades ingest");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = IngestConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    tokio::spawn(await_shutdown(shutdown_token.clone()));

    let (ingester, stream_status) = build_ingester(&config)?;

    let publisher = JsonLinesPublisher::stdout(config.topic.clone());
    let ingestion = IngestionLoop::new(ingester, publisher, shutdown_token.clone());

    let health_handle = if config.server.health_port == 0 {
        None
    } else {
        let state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            ingestion.status(),
            stream_status,
        ));
        let server = HealthServer::new(config.server.health_port, state, shutdown_token.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        }))
    };

    let result = ingestion.run().await;

    shutdown_token.cancel();
    if let Some(handle) = health_handle {
        let _ = handle.await;
    }

    let summary = result.context("ingestion failed")?;
    tracing::info!(
        mode = %summary.mode,
        trades_published = summary.trades_published,
        completed = summary.completed,
        "Trades ingest stopped"
    );
    Ok(())
}

/// Build the ingester for the configured mode.
///
/// Live mode also hands back the stream status for the health server.
fn build_ingester(
    config: &IngestConfig,
) -> anyhow::Result<(Box<dyn Ingester>, Option<Arc<StreamStatus>>)> {
    match config.mode {
        IngestionMode::Historical => {
            let client = BinanceRestClient::new(config.rest_client_config())
                .context("failed to build REST client")?;
            let ingester = HistoricalIngester::new(&config.symbols, config.last_n_days, client);
            tracing::info!(
                range_start_ms = ingester.range_start_ms(),
                "Historical backfill range computed"
            );
            Ok((Box::new(ingester), None))
        }
        IngestionMode::Live => {
            let source = BinanceStreamSource::new(config.stream_config());
            let status = source.status();
            let ingester = LiveIngester::new(&config.symbols, source, config.queue_capacity);
            Ok((Box::new(ingester), Some(status)))
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &IngestConfig) {
    tracing::info!(
        mode = %config.mode,
        topic = %config.topic,
        symbols = config.symbols.len(),
        last_n_days = config.last_n_days,
        queue_capacity = config.queue_capacity,
        health_port = config.server.health_port,
        "Configuration loaded"
    );
    tracing::debug!(
        rest_base_url = %config.rest.base_url,
        stream_url = %config.websocket.url,
        "Binance endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
        () = shutdown_token.cancelled() => return,
    }

    shutdown_token.cancel();
}
