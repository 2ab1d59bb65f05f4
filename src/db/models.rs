/// Database row types matching `migrations/0001_init.sql`.
/// Used by sqlx for typed queries; converted into domain types at the gateway edge.
use std::collections::BTreeMap;

use crate::stats::AggregateStats;
use crate::types::{DatedEntry, Direction, OracleEntry, RoundHeader, Slot};

#[derive(Debug, sqlx::FromRow)]
pub struct RoundRow {
    pub round_id: i64,
    pub price_diff: f64,
    pub payout_up: f64,
    pub payout_down: f64,
    pub pool_value: f64,
    pub winner: String,
    pub opened_at: Option<i64>,
    pub closed_at: i64,
    pub backfilled: bool,
}

impl From<RoundRow> for RoundHeader {
    fn from(r: RoundRow) -> Self {
        Self {
            round_id: r.round_id as u64,
            winner: Direction::parse(&r.winner).unwrap_or_else(|| Direction::from_diff(r.price_diff)),
            price_diff: r.price_diff,
            payout_up: r.payout_up,
            payout_down: r.payout_down,
            pool_value: r.pool_value,
            opened_at: r.opened_at,
            closed_at: r.closed_at,
            backfilled: r.backfilled,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct EntryRow {
    pub round_id: i64,
    pub slot: String,
    pub recorded_at: i64,
    pub pool_value: f64,
    pub payout_up: f64,
    pub payout_down: f64,
    pub price_diff: Option<f64>,
    pub oracle_price: Option<f64>,
    pub time_left: Option<String>,
    pub seconds_since_candle_open: Option<i64>,
    pub external_prices: String,
}

impl From<EntryRow> for DatedEntry {
    fn from(r: EntryRow) -> Self {
        Self {
            recorded_at: r.recorded_at,
            slot: Slot::parse(&r.slot).unwrap_or(Slot::Live),
            pool_value: r.pool_value,
            payout_up: r.payout_up,
            payout_down: r.payout_down,
            price_diff: r.price_diff,
            oracle_price: r.oracle_price,
            time_left: r.time_left,
            seconds_since_candle_open: r.seconds_since_candle_open.map(|s| s as u32),
            external_prices: decode_prices(&r.external_prices),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct OracleRow {
    pub round_id: i64,
    pub oracle_price: f64,
    pub recorded_at: i64,
    pub time_left: Option<String>,
    pub seconds_since_candle_open: Option<i64>,
    pub external_prices: String,
}

impl From<OracleRow> for OracleEntry {
    fn from(r: OracleRow) -> Self {
        Self {
            round_id: r.round_id as u64,
            oracle_price: r.oracle_price,
            recorded_at: r.recorded_at,
            time_left: r.time_left,
            seconds_since_candle_open: r.seconds_since_candle_open.map(|s| s as u32),
            external_prices: decode_prices(&r.external_prices),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
pub struct AggregateRow {
    pub total_payout: f64,
    pub total_pool: f64,
    pub total_diff_up: f64,
    pub total_diff_down: f64,
    pub safe_wins: i64,
    pub risky_wins: i64,
    pub safe_total_payout: f64,
    pub risky_total_payout: f64,
    pub nb_round_up: i64,
    pub nb_round_down: i64,
    pub nb_entries: i64,
    pub computed_at: i64,
}

impl From<AggregateRow> for AggregateStats {
    fn from(r: AggregateRow) -> Self {
        Self {
            total_payout: r.total_payout,
            total_pool: r.total_pool,
            total_diff_up: r.total_diff_up,
            total_diff_down: r.total_diff_down,
            safe_wins: r.safe_wins as u64,
            risky_wins: r.risky_wins as u64,
            safe_total_payout: r.safe_total_payout,
            risky_total_payout: r.risky_total_payout,
            nb_round_up: r.nb_round_up as u64,
            nb_round_down: r.nb_round_down as u64,
            nb_entries: r.nb_entries as u64,
            computed_at: r.computed_at,
        }
    }
}

/// Reference prices are stored as a JSON object; a corrupt column reads as empty.
fn decode_prices(json: &str) -> BTreeMap<String, f64> {
    serde_json::from_str(json).unwrap_or_default()
}
