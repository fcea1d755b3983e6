//! Ingestion Configuration Settings
//!
//! Configuration types for the trade ingester, loaded from environment
//! variables. Loading goes through a lookup function so tests can supply a
//! map instead of mutating the process environment.
//!
//! Numeric values that fail to parse fall back to their defaults. Missing
//! topic, empty symbol list, unknown mode and zero-valued day count or queue
//! capacity are hard errors.

use std::time::Duration;

use crate::domain::mode::IngestionMode;
use crate::infrastructure::binance::{
    BinanceRestConfig, BinanceStreamConfig, DEFAULT_REST_BASE_URL, DEFAULT_STREAM_URL,
    ReconnectConfig,
};

/// Symbols ingested when `TRADES_PRODUCT_IDS` is unset.
pub const DEFAULT_SYMBOLS: &[&str] = &[
    "BTCUSDT", "ETHUSDT", "SOLUSDT", "BNBUSDT", "XRPUSDT", "DOGEUSDT", "ADAUSDT", "AVAXUSDT",
    "LINKUSDT", "DOTUSDT",
];

/// Binance API credentials. Both halves are optional for public market data.
#[derive(Clone, Default)]
pub struct Credentials {
    api_key: Option<String>,
    api_secret: Option<String>,
}

impl Credentials {
    /// Create new credentials.
    #[must_use]
    pub const fn new(api_key: Option<String>, api_secret: Option<String>) -> Self {
        Self {
            api_key,
            api_secret,
        }
    }

    /// Get the API key.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }

    /// Get the API secret.
    #[must_use]
    pub fn api_secret(&self) -> Option<&str> {
        self.api_secret.as_deref()
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |v: &Option<String>| if v.is_some() { "[REDACTED]" } else { "None" };
        f.debug_struct("Credentials")
            .field("api_key", &redact(&self.api_key))
            .field("api_secret", &redact(&self.api_secret))
            .finish()
    }
}

/// REST backfill client settings.
#[derive(Debug, Clone)]
pub struct RestSettings {
    /// Base URL of the futures REST API.
    pub base_url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Transport-level retries for network errors and 5xx responses.
    pub retries: u32,
}

impl Default for RestSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_REST_BASE_URL.to_string(),
            timeout: Duration::from_millis(30_000),
            retries: 3,
        }
    }
}

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Combined-stream endpoint.
    pub url: String,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_STREAM_URL.to_string(),
            reconnect_delay_initial: Duration::from_millis(5_000),
            reconnect_delay_max: Duration::from_secs(60),
        }
    }
}

/// Server port settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self { health_port: 8083 }
    }
}

/// Complete ingester configuration.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Symbols to ingest, as configured.
    pub symbols: Vec<String>,
    /// Topic every published trade is tagged with.
    pub topic: String,
    /// Live streaming or historical backfill.
    pub mode: IngestionMode,
    /// Size of the historical range in days.
    pub last_n_days: u32,
    /// Live-mode queue capacity.
    pub queue_capacity: usize,
    /// API credentials.
    pub credentials: Credentials,
    /// REST client settings.
    pub rest: RestSettings,
    /// WebSocket settings.
    pub websocket: WebSocketSettings,
    /// Server port settings.
    pub server: ServerSettings,
}

impl IngestConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or a value is
    /// outside its allowed domain.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`IngestConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };

        let topic = env
            .get("KAFKA_TOPIC_NAME")
            .ok_or_else(|| ConfigError::MissingEnvVar("KAFKA_TOPIC_NAME".to_string()))?;

        let symbols = match env.get("TRADES_PRODUCT_IDS") {
            Some(raw) => parse_symbol_list(&raw),
            None => DEFAULT_SYMBOLS.iter().map(ToString::to_string).collect(),
        };
        if symbols.is_empty() {
            return Err(ConfigError::EmptyValue("TRADES_PRODUCT_IDS".to_string()));
        }

        let mode = match env.get("LIVE_OR_HISTORICAL") {
            Some(raw) => IngestionMode::parse(&raw).ok_or(ConfigError::InvalidMode(raw))?,
            None => IngestionMode::default(),
        };

        let last_n_days = env.parse("LAST_N_DAYS", 30_u32);
        if last_n_days == 0 {
            return Err(ConfigError::ZeroValue("LAST_N_DAYS".to_string()));
        }

        let queue_capacity = env.parse("TRADE_QUEUE_CAPACITY", 10_000_usize);
        if queue_capacity == 0 {
            return Err(ConfigError::ZeroValue("TRADE_QUEUE_CAPACITY".to_string()));
        }

        let credentials = Credentials::new(
            env.get("BINANCE_API_KEY"),
            env.get("BINANCE_API_SECRET"),
        );

        let rest_defaults = RestSettings::default();
        let rest = RestSettings {
            base_url: env
                .get("BINANCE_REST_BASE_URL")
                .unwrap_or(rest_defaults.base_url),
            timeout: env.millis("REST_API_TIMEOUT_MS", rest_defaults.timeout),
            retries: env.parse("REST_API_RETRIES", rest_defaults.retries),
        };

        let ws_defaults = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            url: env.get("BINANCE_STREAM_URL").unwrap_or(ws_defaults.url),
            reconnect_delay_initial: env.millis(
                "WEBSOCKET_RECONNECT_DELAY_MS",
                ws_defaults.reconnect_delay_initial,
            ),
            reconnect_delay_max: env.secs(
                "WEBSOCKET_RECONNECT_DELAY_MAX_SECS",
                ws_defaults.reconnect_delay_max,
            ),
        };

        let server = ServerSettings {
            health_port: env.parse("TRADES_HEALTH_PORT", ServerSettings::default().health_port),
        };

        Ok(Self {
            symbols,
            topic,
            mode,
            last_n_days,
            queue_capacity,
            credentials,
            rest,
            websocket,
            server,
        })
    }

    /// Settings for the REST backfill client.
    #[must_use]
    pub fn rest_client_config(&self) -> BinanceRestConfig {
        BinanceRestConfig {
            base_url: self.rest.base_url.clone(),
            timeout: self.rest.timeout,
            retries: self.rest.retries,
            api_key: self.credentials.api_key().map(ToString::to_string),
            ..BinanceRestConfig::default()
        }
    }

    /// Settings for the streaming connection.
    #[must_use]
    pub fn stream_config(&self) -> BinanceStreamConfig {
        BinanceStreamConfig {
            url: self.websocket.url.clone(),
            reconnect: ReconnectConfig::with_delays(
                self.websocket.reconnect_delay_initial,
                self.websocket.reconnect_delay_max,
            ),
            ..BinanceStreamConfig::default()
        }
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable must be greater than zero.
    #[error("environment variable {0} must be greater than zero")]
    ZeroValue(String),
    /// `LIVE_OR_HISTORICAL` holds an unknown value.
    #[error("LIVE_OR_HISTORICAL must be 'live' or 'historical', got '{0}'")]
    InvalidMode(String),
}

/// Split a comma list, trimming entries and dropping blanks.
fn parse_symbol_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

struct Env<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
    }

    fn parse<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    fn millis(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_millis)
    }

    fn secs(&self, key: &str, default: Duration) -> Duration {
        self.get(key)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map_or(default, Duration::from_secs)
    }
}
