use std::collections::BTreeMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::Deserialize;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::{Config, CANDLE_SECS};
use crate::error::{AppError, Result};
use crate::types::{PollContext, RawSnapshot, SnapshotPair};

/// Where round cards come from. Implementations own their transport; the poll
/// loop only sees raw cards plus capture context.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot_pair(&self) -> Result<SnapshotPair>;

    /// Cards of rounds already settled, for backfilling rounds the poller missed.
    async fn fetch_expired_candidates(&self) -> Result<Vec<RawSnapshot>>;
}

/// Body of the sidecar's `GET /snapshot`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SidecarSnapshot {
    live: RawSnapshot,
    next: RawSnapshot,
    #[serde(default)]
    closing: Option<RawSnapshot>,
    #[serde(default)]
    time_left: Option<String>,
}

/// One row of the ticker endpoint, e.g. `{"symbol":"BNBUSDT","price":"612.40"}`.
#[derive(Debug, Deserialize)]
struct TickerPrice {
    symbol: String,
    price: String,
}

/// Reads snapshot pairs from the scraping sidecar over HTTP and stamps them
/// with reference prices from the ticker API.
pub struct HttpSnapshotSource {
    client: reqwest::Client,
    source_url: String,
    reference_price_url: String,
    reference_symbols: Vec<String>,
    reference_timeout: Duration,
}

impl HttpSnapshotSource {
    pub fn new(cfg: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(cfg.fetch_timeout)
            .build()?;
        Ok(Self {
            client,
            source_url: cfg.source_url.trim_end_matches('/').to_string(),
            reference_price_url: cfg.reference_price_url.clone(),
            reference_symbols: cfg.reference_symbols.clone(),
            reference_timeout: cfg.reference_timeout.min(cfg.fetch_timeout),
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AppError::Source(format!("GET {url}: {e}")))?;
        let resp = resp
            .error_for_status()
            .map_err(|e| AppError::Source(format!("GET {url}: {e}")))?;
        resp.json::<T>()
            .await
            .map_err(|e| AppError::Source(format!("GET {url}: bad body: {e}")))
    }

    /// Best effort: a symbol whose price cannot be read within
    /// `reference_timeout` is left out. Lookups run concurrently.
    async fn reference_prices(&self) -> BTreeMap<String, f64> {
        let mut lookups = JoinSet::new();
        for symbol in &self.reference_symbols {
            let request = self
                .client
                .get(format!("{}?symbol={symbol}", self.reference_price_url))
                .timeout(self.reference_timeout);
            let symbol = symbol.clone();
            lookups.spawn(async move { (symbol, fetch_ticker(request).await) });
        }

        let mut prices = BTreeMap::new();
        while let Some(joined) = lookups.join_next().await {
            match joined {
                Ok((_, Ok(t))) => match t.price.parse::<f64>() {
                    Ok(p) => {
                        prices.insert(t.symbol, p);
                    }
                    Err(_) => warn!("Ticker {}: unparseable price {:?}", t.symbol, t.price),
                },
                Ok((symbol, Err(e))) => warn!("Ticker {symbol} unavailable: {e}"),
                Err(e) => warn!("Ticker lookup aborted: {e}"),
            }
        }
        prices
    }
}

#[async_trait]
impl SnapshotSource for HttpSnapshotSource {
    async fn fetch_snapshot_pair(&self) -> Result<SnapshotPair> {
        let url = format!("{}/snapshot", self.source_url);
        let (body, external_prices) =
            tokio::join!(self.get_json::<SidecarSnapshot>(&url), self.reference_prices());
        let body = body?;
        let context = capture_context(SystemTime::now(), body.time_left, external_prices);
        debug!(
            live = ?body.live.round_id,
            next = ?body.next.round_id,
            "Fetched snapshot pair"
        );
        Ok(SnapshotPair {
            live: body.live,
            next: body.next,
            closing: body.closing,
            context,
        })
    }

    async fn fetch_expired_candidates(&self) -> Result<Vec<RawSnapshot>> {
        let url = format!("{}/expired", self.source_url);
        self.get_json(&url).await
    }
}

async fn fetch_ticker(request: reqwest::RequestBuilder) -> reqwest::Result<TickerPrice> {
    request.send().await?.error_for_status()?.json().await
}

fn capture_context(
    now: SystemTime,
    time_left: Option<String>,
    external_prices: BTreeMap<String, f64>,
) -> PollContext {
    let since_epoch = now.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO);
    PollContext {
        captured_at: since_epoch.as_millis() as i64,
        time_left,
        seconds_since_candle_open: Some((since_epoch.as_secs() % CANDLE_SECS) as u32),
        external_prices,
    }
}
