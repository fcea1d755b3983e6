//! Binance REST Client
//!
//! `aggTrades` history over HTTP with per-call timeout and bounded retries
//! for transport errors and 5xx/408 responses.
//!
//! Rate-limit (429) and ban (418) responses are returned immediately; the
//! caller owns the cooldown policy for those.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};

use super::messages::RestAggTrade;
use crate::application::ports::{FetchError, TradeHistorySource, TradeRecord};

/// Default REST endpoint for USD-M futures.
pub const DEFAULT_REST_BASE_URL: &str = "https://fapi.binance.com";

const AGG_TRADES_PATH: &str = "/fapi/v1/aggTrades";

// =============================================================================
// Configuration
// =============================================================================

/// REST client settings.
#[derive(Clone)]
pub struct BinanceRestConfig {
    /// Base URL without trailing path.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Retries after the first attempt for transient failures.
    pub retries: u32,
    /// First retry delay; doubles per retry.
    pub initial_backoff: Duration,
    /// Upper bound on retry delay.
    pub max_backoff: Duration,
    /// Optional API key, sent as `X-MBX-APIKEY`.
    pub api_key: Option<String>,
}

impl Default for BinanceRestConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REST_BASE_URL.to_string(),
            timeout: Duration::from_secs(30),
            retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(5),
            api_key: None,
        }
    }
}

impl std::fmt::Debug for BinanceRestConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinanceRestConfig")
            .field("base_url", &self.base_url)
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("initial_backoff", &self.initial_backoff)
            .field("max_backoff", &self.max_backoff)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

// =============================================================================
// Client
// =============================================================================

/// HTTP client for Binance `aggTrades`.
#[derive(Debug, Clone)]
pub struct BinanceRestClient {
    client: Client,
    config: BinanceRestConfig,
}

impl BinanceRestClient {
    /// Build a client.
    ///
    /// # Errors
    ///
    /// Returns [`FetchError::Network`] if the HTTP client cannot be built.
    pub fn new(config: BinanceRestConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| FetchError::Network(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn url(&self) -> String {
        format!(
            "{}{AGG_TRADES_PATH}",
            self.config.base_url.trim_end_matches('/')
        )
    }
}

#[async_trait]
impl TradeHistorySource for BinanceRestClient {
    async fn fetch(
        &self,
        symbol: &str,
        start_ms: i64,
        end_ms: i64,
        limit: u32,
    ) -> Result<Vec<TradeRecord>, FetchError> {
        if end_ms <= start_ms {
            return Ok(Vec::new());
        }

        let url = self.url();
        // Binance treats endTime as inclusive.
        let query = [
            ("symbol", symbol.to_uppercase()),
            ("startTime", start_ms.to_string()),
            ("endTime", (end_ms - 1).to_string()),
            ("limit", limit.to_string()),
        ];
        let mut backoff = ExponentialBackoff::new(&self.config);

        loop {
            let mut request = self.client.get(&url).query(&query);
            if let Some(key) = &self.config.api_key {
                request = request.header("X-MBX-APIKEY", key);
            }

            let response = match request.send().await {
                Ok(resp) => resp,
                Err(e) => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            symbol,
                            error = %e,
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt,
                            "Network error, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(FetchError::Network(e.to_string()));
                }
            };

            let status = response.status();

            if status.is_success() {
                let body = response
                    .text()
                    .await
                    .map_err(|e| FetchError::Network(e.to_string()))?;
                let trades: Vec<RestAggTrade> =
                    serde_json::from_str(&body).map_err(|e| FetchError::Decode(e.to_string()))?;
                return Ok(trades.iter().map(RestAggTrade::to_record).collect());
            }

            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            let body = response.text().await.unwrap_or_default();

            match categorize_status(status) {
                ErrorCategory::RateLimited => return Err(FetchError::RateLimited { retry_after }),
                ErrorCategory::Banned => return Err(FetchError::Banned { retry_after }),
                ErrorCategory::Retryable => {
                    if let Some(delay) = backoff.next_backoff() {
                        tracing::warn!(
                            symbol,
                            status = status.as_u16(),
                            delay_ms = delay.as_millis(),
                            attempt = backoff.attempt,
                            "Retryable HTTP status, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(FetchError::Http {
                        status: status.as_u16(),
                        message: body,
                    });
                }
                ErrorCategory::NonRetryable => {
                    return Err(FetchError::Http {
                        status: status.as_u16(),
                        message: body,
                    });
                }
            }
        }
    }
}

/// Error category for determining retry behavior.
#[derive(Debug, PartialEq, Eq)]
enum ErrorCategory {
    RateLimited,
    Banned,
    Retryable,
    NonRetryable,
}

/// Categorize HTTP status code for retry handling.
const fn categorize_status(status: StatusCode) -> ErrorCategory {
    match status.as_u16() {
        429 => ErrorCategory::RateLimited,
        418 => ErrorCategory::Banned,
        408 | 500..=599 => ErrorCategory::Retryable,
        _ => ErrorCategory::NonRetryable,
    }
}

/// Exponential backoff calculator for transient failures.
struct ExponentialBackoff {
    attempt: u32,
    max_retries: u32,
    current_backoff: Duration,
    max_backoff: Duration,
}

impl ExponentialBackoff {
    const fn new(config: &BinanceRestConfig) -> Self {
        Self {
            attempt: 0,
            max_retries: config.retries,
            current_backoff: config.initial_backoff,
            max_backoff: config.max_backoff,
        }
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_retries {
            return None;
        }
        self.attempt += 1;

        let backoff = self.current_backoff;
        self.current_backoff = self.current_backoff.saturating_mul(2).min(self.max_backoff);
        Some(backoff)
    }
}
