use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::normalizer;

// ---------------------------------------------------------------------------
// Directions and buckets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    /// Positive delta means UP won; zero and negative settle DOWN.
    pub fn from_diff(price_diff: f64) -> Self {
        if price_diff > 0.0 {
            Direction::Up
        } else {
            Direction::Down
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "UP" => Some(Direction::Up),
            "DOWN" => Some(Direction::Down),
            _ => None,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
        }
    }
}

/// Which side of the market the winner was on, judged by payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskBucket {
    /// Lower payout multiple: the favorite.
    Safe,
    /// Strictly higher payout multiple: the underdog.
    Risky,
}

/// Slot a round occupied on the page when an entry was captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Live,
    Next,
}

impl Slot {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "live" => Some(Slot::Live),
            "next" => Some(Slot::Next),
            _ => None,
        }
    }
}

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Slot::Live => write!(f, "live"),
            Slot::Next => write!(f, "next"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SourceStatus {
    Up,
    Down,
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceStatus::Up => write!(f, "UP"),
            SourceStatus::Down => write!(f, "DOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Raw input from the source adapter
// ---------------------------------------------------------------------------

/// One round card as scraped, before normalization. Every field is optional
/// text; the sidecar may send numbers too, which are kept as their text form.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawSnapshot {
    #[serde(deserialize_with = "text_or_number")]
    pub round_id: Option<String>,
    #[serde(deserialize_with = "text_or_number")]
    pub pool_value: Option<String>,
    #[serde(rename = "payoutUP", deserialize_with = "text_or_number")]
    pub payout_up: Option<String>,
    #[serde(rename = "payoutDOWN", deserialize_with = "text_or_number")]
    pub payout_down: Option<String>,
    #[serde(deserialize_with = "text_or_number")]
    pub price_diff: Option<String>,
    #[serde(deserialize_with = "text_or_number")]
    pub oracle_price: Option<String>,
}

fn text_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Timing and reference-price context captured alongside a snapshot pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PollContext {
    /// Unix milliseconds when the pair was captured.
    pub captured_at: i64,
    pub time_left: Option<String>,
    pub seconds_since_candle_open: Option<u32>,
    pub external_prices: BTreeMap<String, f64>,
}

/// What one poll of the source returns.
#[derive(Debug, Clone, Default)]
pub struct SnapshotPair {
    pub live: RawSnapshot,
    pub next: RawSnapshot,
    /// The round that just left the live slot, carrying its settled values.
    pub closing: Option<RawSnapshot>,
    pub context: PollContext,
}

// ---------------------------------------------------------------------------
// Normalized snapshot
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub round_id: u64,
    pub pool_value: f64,
    pub payout_up: f64,
    pub payout_down: f64,
    /// Always present for live and closing snapshots.
    pub price_diff: Option<f64>,
    pub oracle_price: Option<f64>,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub time_left: Option<String>,
    pub seconds_since_candle_open: Option<u32>,
    pub external_prices: BTreeMap<String, f64>,
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// One intermediate observation of a round while it was next or live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatedEntry {
    pub recorded_at: i64,
    pub slot: Slot,
    pub pool_value: f64,
    pub payout_up: f64,
    pub payout_down: f64,
    pub price_diff: Option<f64>,
    pub oracle_price: Option<f64>,
    pub time_left: Option<String>,
    pub seconds_since_candle_open: Option<u32>,
    pub external_prices: BTreeMap<String, f64>,
}

impl DatedEntry {
    pub fn from_snapshot(snapshot: &Snapshot, slot: Slot) -> Self {
        Self {
            recorded_at: snapshot.timestamp,
            slot,
            pool_value: snapshot.pool_value,
            payout_up: snapshot.payout_up,
            payout_down: snapshot.payout_down,
            price_diff: snapshot.price_diff,
            oracle_price: snapshot.oracle_price,
            time_left: snapshot.time_left.clone(),
            seconds_since_candle_open: snapshot.seconds_since_candle_open,
            external_prices: snapshot.external_prices.clone(),
        }
    }
}

/// Closing header of a finalized round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundHeader {
    pub round_id: u64,
    pub price_diff: f64,
    pub payout_up: f64,
    pub payout_down: f64,
    pub pool_value: f64,
    pub winner: Direction,
    pub opened_at: Option<i64>,
    pub closed_at: i64,
    /// Recorded by the expired sweep: `closed_at` is when the sweep ran, not
    /// when the round settled.
    #[serde(default)]
    pub backfilled: bool,
}

impl RoundHeader {
    pub fn winning_payout(&self) -> f64 {
        normalizer::winning_payout(self.price_diff, self.payout_up, self.payout_down)
    }

    pub fn risk_bucket(&self) -> RiskBucket {
        normalizer::risk_bucket(self.winner, self.payout_up, self.payout_down)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    pub header: RoundHeader,
    pub entries: Vec<DatedEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleEntry {
    pub round_id: u64,
    pub oracle_price: f64,
    pub recorded_at: i64,
    pub time_left: Option<String>,
    pub seconds_since_candle_open: Option<u32>,
    pub external_prices: BTreeMap<String, f64>,
}

/// Result of an idempotent finalize. A repeat is a success, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    Recorded,
    AlreadyRecorded,
}

// ---------------------------------------------------------------------------
// Tracker events
// ---------------------------------------------------------------------------

/// Lifecycle events emitted by one reconcile pass, in rule order.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackerEvent {
    OracleRevealed(OracleEntry),
    RoundClosed(RoundRecord),
    RoundOpened { round_id: u64 },
    NextUpdated { round_id: u64, entry: DatedEntry },
    /// `entry` is only present when the oracle price moved.
    LiveUpdated { round_id: u64, entry: Option<DatedEntry> },
}

/// Current wall clock as unix milliseconds.
pub fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
