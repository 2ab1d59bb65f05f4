use serde::Deserialize;

// ---------------------------------------------------------------------------
// API response types (mirror routes.rs shapes)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct HealthResponse {
    pub status: String,
    pub last_round_id: Option<u64>,
    pub cycles_run: u64,
    pub cycles_paused: u64,
    pub last_cycle_at: Option<i64>,
}

/// Every figure is null until the aggregator has run at least once.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AveragesResponse {
    pub avg_payout: Option<f64>,
    pub avg_pool: Option<f64>,
    pub avg_diff_up: Option<f64>,
    pub avg_diff_down: Option<f64>,
    pub avg_safe: Option<f64>,
    pub avg_risky: Option<f64>,
    pub safe_percent_wr: Option<f64>,
    pub risky_percent_wr: Option<f64>,
    pub expected_safe: Option<f64>,
    pub expected_risky: Option<f64>,
    pub nb_round_up: Option<u64>,
    pub nb_round_down: Option<u64>,
    pub nb_entries: Option<u64>,
    pub bet_amount: f64,
    pub computed_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct MedianResponse {
    pub payout: Option<f64>,
    pub pool: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GapFrequency {
    pub value: i64,
    pub count: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct OracleTimingResponse {
    pub average: Option<f64>,
    pub median: Option<i64>,
    pub odds: Vec<GapFrequency>,
    pub gaps: Vec<i64>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct RoundResponse {
    pub round_id: u64,
    pub price_diff: f64,
    pub payout_up: f64,
    pub payout_down: f64,
    pub pool_value: f64,
    pub winner: String,
    pub opened_at: Option<i64>,
    pub closed_at: i64,
}

impl RoundResponse {
    pub fn winning_payout(&self) -> f64 {
        if self.price_diff > 0.0 {
            self.payout_up
        } else {
            self.payout_down
        }
    }

    /// The winner was the underdog when its payout was strictly higher.
    pub fn is_risky(&self) -> bool {
        let (won, lost) = if self.winner == "UP" {
            (self.payout_up, self.payout_down)
        } else {
            (self.payout_down, self.payout_up)
        };
        won > lost
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[allow(dead_code)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// App state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Error(String),
    Connecting,
}

#[derive(Debug, Clone)]
pub struct AppState {
    pub status: ConnectionStatus,
    pub health: HealthResponse,
    pub averages: AveragesResponse,
    pub medians: MedianResponse,
    pub oracles: OracleTimingResponse,
    pub rounds: Vec<RoundResponse>,
    pub latency: LatencyResponse,
    pub last_refresh: std::time::Instant,
    pub base_url: String,
}

impl AppState {
    pub fn new(base_url: String) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            health: HealthResponse::default(),
            averages: AveragesResponse::default(),
            medians: MedianResponse::default(),
            oracles: OracleTimingResponse::default(),
            rounds: Vec::new(),
            latency: LatencyResponse::default(),
            last_refresh: std::time::Instant::now(),
            base_url,
        }
    }

    pub async fn refresh(&mut self, client: &reqwest::Client) {
        let health_url = format!("{}/health", self.base_url);
        let averages_url = format!("{}/stats/averages", self.base_url);
        let rounds_url = format!("{}/rounds/recent?limit=100", self.base_url);
        let median_url = format!("{}/stats/median", self.base_url);
        let oracles_url = format!("{}/stats/oracles", self.base_url);
        let latency_url = format!("{}/stats/latency", self.base_url);

        let (health, averages, rounds, median, oracles, latency) = tokio::join!(
            fetch::<HealthResponse>(client, &health_url),
            fetch::<AveragesResponse>(client, &averages_url),
            fetch::<Vec<RoundResponse>>(client, &rounds_url),
            fetch::<MedianResponse>(client, &median_url),
            fetch::<OracleTimingResponse>(client, &oracles_url),
            fetch::<LatencyResponse>(client, &latency_url),
        );

        match (health, averages, rounds) {
            (Ok(h), Ok(a), Ok(r)) => {
                self.health = h;
                self.averages = a;
                self.rounds = r;
                self.status = ConnectionStatus::Connected;
                self.last_refresh = std::time::Instant::now();

                // Secondary panels keep their last value on failure.
                if let Ok(m) = median {
                    self.medians = m;
                }
                if let Ok(o) = oracles {
                    self.oracles = o;
                }
                if let Ok(l) = latency {
                    self.latency = l;
                }
            }
            (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
                self.status = ConnectionStatus::Error(e);
            }
        }
    }
}

async fn fetch<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !resp.status().is_success() {
        return Err(format!("{} {}", resp.status(), url));
    }
    resp.json::<T>()
        .await
        .map_err(|e| format!("parse error: {e}"))
}

// ---------------------------------------------------------------------------
// Formatting helpers
// ---------------------------------------------------------------------------

pub fn format_stat(v: Option<f64>, suffix: &str) -> String {
    match v {
        Some(v) => format!("{v:.2}{suffix}"),
        None => "—".to_string(),
    }
}

pub fn format_diff(v: f64) -> String {
    format!("{v:+.4}")
}

/// Convert millisecond epoch timestamp to HH:MM:SS string (UTC).
pub fn format_time_ms(ms: i64) -> String {
    let secs = (ms / 1000).max(0) as u64;
    let h = (secs / 3600) % 24;
    let m = (secs / 60) % 60;
    let s = secs % 60;
    format!("{h:02}:{m:02}:{s:02}")
}

pub fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{head}…")
    }
}
