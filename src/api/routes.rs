use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::db::Gateway;
use crate::error::{self, AppError};
use crate::stats::aggregate::expected_value;
use crate::stats::hourly::{group_by_hour, hourly_records, HourlyAverages};
use crate::stats::median::{medians, Medians};
use crate::stats::oracle_timing::{oracle_timing, OracleTiming};
use crate::stats::{averages, Averages};
use crate::types::{DatedEntry, RoundHeader, SourceStatus};

#[derive(Clone)]
pub struct ApiState {
    pub gateway: Arc<dyn Gateway>,
    pub health: Arc<HealthState>,
    pub latency: Arc<LatencyStats>,
    pub bet_amount: f64,
    /// Upper bound for each gateway call a handler makes.
    pub persist_timeout: Duration,
}

impl ApiState {
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = error::Result<T>>,
    ) -> error::Result<T> {
        timeout(self.persist_timeout, fut)
            .await
            .map_err(|_| AppError::PersistenceUnavailable("gateway call timed out".into()))?
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/rounds/recent", get(get_recent_rounds))
        .route("/rounds/:id/entries", get(get_round_entries))
        .route("/stats/averages", get(get_averages))
        .route("/stats/median", get(get_median))
        .route("/stats/oracles", get(get_oracles))
        .route("/stats/hourly", get(get_hourly))
        .route("/stats/expected", get(get_expected))
        .route("/stats/latency", get(get_stats_latency))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentRoundsQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct ExpectedQuery {
    /// Win rate in percent.
    pub p_win: f64,
    pub win: f64,
    pub bet: Option<f64>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: SourceStatus,
    pub last_round_id: Option<u64>,
    pub cycles_run: u64,
    pub cycles_paused: u64,
    /// Unix ms of the last committed poll cycle.
    pub last_cycle_at: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct AveragesResponse {
    #[serde(flatten)]
    pub averages: Averages,
    pub bet_amount: f64,
    pub computed_at: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ExpectedResponse {
    pub p_win: f64,
    pub bet: f64,
    pub win: f64,
    pub expected: f64,
}

#[derive(Debug, Serialize)]
pub struct LatencyResponse {
    pub samples: u64,
    pub p50_ms: Option<f64>,
    pub p95_ms: Option<f64>,
    pub p99_ms: Option<f64>,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Json<HealthResponse> {
    let last_cycle = state.health.last_cycle_at_ms();
    Json(HealthResponse {
        status: state.health.status(),
        last_round_id: state.health.last_round_id(),
        cycles_run: state.health.cycles_run(),
        cycles_paused: state.health.cycles_paused(),
        last_cycle_at: (last_cycle > 0).then_some(last_cycle),
    })
}

async fn get_recent_rounds(
    State(state): State<ApiState>,
    Query(params): Query<RecentRoundsQuery>,
) -> Result<Json<Vec<RoundHeader>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 1000);
    Ok(Json(state.bounded(state.gateway.recent_rounds(limit)).await?))
}

async fn get_round_entries(
    State(state): State<ApiState>,
    Path(round_id): Path<u64>,
) -> Result<Json<Vec<DatedEntry>>, AppError> {
    Ok(Json(state.bounded(state.gateway.round_entries(round_id)).await?))
}

async fn get_averages(State(state): State<ApiState>) -> Result<Json<AveragesResponse>, AppError> {
    let stats = state.bounded(state.gateway.read_aggregate()).await?;
    Ok(Json(AveragesResponse {
        averages: averages(stats.as_ref(), state.bet_amount),
        bet_amount: state.bet_amount,
        computed_at: stats.map(|s| s.computed_at),
    }))
}

async fn get_median(State(state): State<ApiState>) -> Result<Json<Medians>, AppError> {
    let rounds = state.bounded(state.gateway.list_all_rounds()).await?;
    Ok(Json(medians(&rounds)))
}

async fn get_oracles(State(state): State<ApiState>) -> Result<Json<OracleTiming>, AppError> {
    let reveals: Vec<i64> = state
        .bounded(state.gateway.list_oracle_entries())
        .await?
        .iter()
        .map(|o| o.recorded_at)
        .collect();
    Ok(Json(oracle_timing(&reveals)))
}

async fn get_hourly(State(state): State<ApiState>) -> Result<Json<Vec<HourlyAverages>>, AppError> {
    let rounds = state.bounded(state.gateway.list_all_rounds()).await?;
    let records = hourly_records(&rounds, state.bet_amount);
    Ok(Json(group_by_hour(&records)))
}

async fn get_expected(
    State(state): State<ApiState>,
    Query(params): Query<ExpectedQuery>,
) -> Json<ExpectedResponse> {
    let bet = params.bet.unwrap_or(state.bet_amount);
    Json(ExpectedResponse {
        p_win: params.p_win,
        bet,
        win: params.win,
        expected: expected_value(params.p_win, bet, params.win),
    })
}

async fn get_stats_latency(State(state): State<ApiState>) -> Json<LatencyResponse> {
    let (p50, p95, p99) = state.latency.percentiles();
    let to_ms = |us: Option<u64>| us.map(|v| v as f64 / 1000.0);
    Json(LatencyResponse {
        samples: state.latency.len(),
        p50_ms: to_ms(p50),
        p95_ms: to_ms(p95),
        p99_ms: to_ms(p99),
    })
}
