use std::time::Duration;

use crate::error::{AppError, Result};

/// Sidecar that renders the market page and serves raw snapshots as JSON.
pub const SOURCE_URL: &str = "http://127.0.0.1:4000";
pub const REFERENCE_PRICE_URL: &str = "https://api.binance.com/api/v3/ticker/price";
pub const REFERENCE_SYMBOLS: &str = "BNBUSDT,BTCUSDT";

/// Poll loop period (seconds). Cycles never overlap; late ticks are delayed.
pub const POLL_INTERVAL_SECS: u64 = 10;

/// Health monitor period (seconds). Two checks with the same latest round id flip the status to DOWN.
pub const HEALTH_CHECK_INTERVAL_SECS: u64 = 600;

/// Full aggregate rebuild period (seconds).
pub const AGGREGATE_INTERVAL_SECS: u64 = 900;

/// Upper bound for one snapshot fetch.
pub const FETCH_TIMEOUT_SECS: u64 = 8;

/// Upper bound for each reference price lookup. Kept well under the fetch
/// timeout so a hung ticker costs prices, not the snapshot.
pub const REFERENCE_TIMEOUT_MS: u64 = 2_000;

/// Upper bound for one gateway call.
pub const PERSIST_TIMEOUT_SECS: u64 = 5;

/// Default stake used by the expected value figures.
pub const BET_AMOUNT: f64 = 10.0;

/// Candle length used to derive `seconds_since_candle_open`.
pub const CANDLE_SECS: u64 = 300;

/// Oracle reveal gaps outside this open band are reload/restart artifacts.
pub mod oracle_gap {
    pub const MIN_SECS: i64 = 20;
    pub const MAX_SECS: i64 = 300;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub source_url: String,
    pub reference_price_url: String,
    /// Reference pairs captured with every entry (REFERENCE_SYMBOLS, comma-separated).
    pub reference_symbols: Vec<String>,
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    pub poll_interval: Duration,
    pub health_check_interval: Duration,
    pub aggregate_interval: Duration,
    pub fetch_timeout: Duration,
    pub reference_timeout: Duration,
    pub persist_timeout: Duration,
    pub bet_amount: f64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            source_url: std::env::var("SOURCE_URL").unwrap_or_else(|_| SOURCE_URL.to_string()),
            reference_price_url: std::env::var("REFERENCE_PRICE_URL")
                .unwrap_or_else(|_| REFERENCE_PRICE_URL.to_string()),
            reference_symbols: std::env::var("REFERENCE_SYMBOLS")
                .unwrap_or_else(|_| REFERENCE_SYMBOLS.to_string())
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "tracker.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            poll_interval: secs_from_env("POLL_INTERVAL_SECS", POLL_INTERVAL_SECS),
            health_check_interval: secs_from_env(
                "HEALTH_CHECK_INTERVAL_SECS",
                HEALTH_CHECK_INTERVAL_SECS,
            ),
            aggregate_interval: secs_from_env("AGGREGATE_INTERVAL_SECS", AGGREGATE_INTERVAL_SECS),
            fetch_timeout: secs_from_env("FETCH_TIMEOUT_SECS", FETCH_TIMEOUT_SECS),
            reference_timeout: Duration::from_millis(
                std::env::var("REFERENCE_TIMEOUT_MS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .filter(|v| *v > 0)
                    .unwrap_or(REFERENCE_TIMEOUT_MS),
            ),
            persist_timeout: secs_from_env("PERSIST_TIMEOUT_SECS", PERSIST_TIMEOUT_SECS),
            bet_amount: std::env::var("BET_AMOUNT")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|v| v.is_finite() && *v > 0.0)
                .unwrap_or(BET_AMOUNT),
        })
    }
}

/// Zero would make `tokio::time::interval` panic, so it falls back to the default too.
fn secs_from_env(key: &str, default: u64) -> Duration {
    let secs = std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default);
    Duration::from_secs(secs)
}
