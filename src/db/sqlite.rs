use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::gateway::Gateway;
use crate::db::models::{AggregateRow, EntryRow, OracleRow, RoundRow};
use crate::error::Result;
use crate::stats::AggregateStats;
use crate::types::{DatedEntry, FinalizeOutcome, OracleEntry, RoundHeader, RoundRecord};

const ROUND_COLUMNS: &str = "round_id, price_diff, payout_up, payout_down, pool_value, winner, \
     opened_at, closed_at, backfilled";

const ENTRY_COLUMNS: &str = "round_id, slot, recorded_at, pool_value, payout_up, payout_down, \
     price_diff, oracle_price, time_left, seconds_since_candle_open, external_prices";

/// `Gateway` over a SQLite pool migrated with `migrations/`.
#[derive(Clone)]
pub struct SqliteGateway {
    pool: SqlitePool,
}

impl SqliteGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn encode_prices(entry_prices: &std::collections::BTreeMap<String, f64>) -> Result<String> {
    Ok(serde_json::to_string(entry_prices)?)
}

async fn insert_entry<'e, E>(executor: E, round_id: u64, entry: &DatedEntry) -> Result<u64>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let prices = encode_prices(&entry.external_prices)?;
    let done = sqlx::query(&format!(
        "INSERT OR IGNORE INTO round_entries ({ENTRY_COLUMNS}) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(round_id as i64)
    .bind(entry.slot.to_string())
    .bind(entry.recorded_at)
    .bind(entry.pool_value)
    .bind(entry.payout_up)
    .bind(entry.payout_down)
    .bind(entry.price_diff)
    .bind(entry.oracle_price)
    .bind(entry.time_left.as_deref())
    .bind(entry.seconds_since_candle_open.map(i64::from))
    .bind(prices)
    .execute(executor)
    .await?;
    Ok(done.rows_affected())
}

#[async_trait]
impl Gateway for SqliteGateway {
    async fn list_all_rounds(&self) -> Result<Vec<RoundHeader>> {
        let rows: Vec<RoundRow> =
            sqlx::query_as(&format!("SELECT {ROUND_COLUMNS} FROM rounds ORDER BY round_id ASC"))
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(RoundHeader::from).collect())
    }

    async fn save_finalized_round(&self, record: &RoundRecord) -> Result<FinalizeOutcome> {
        let h = &record.header;
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(&format!(
            "INSERT OR IGNORE INTO rounds ({ROUND_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(h.round_id as i64)
        .bind(h.price_diff)
        .bind(h.payout_up)
        .bind(h.payout_down)
        .bind(h.pool_value)
        .bind(h.winner.to_string())
        .bind(h.opened_at)
        .bind(h.closed_at)
        .bind(h.backfilled)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        // Entries merge by timestamp even on a repeat, so a retried finalize
        // can complete a series that was only partially appended.
        for entry in &record.entries {
            insert_entry(&mut *tx, h.round_id, entry).await?;
        }

        tx.commit().await?;

        Ok(if inserted == 0 {
            FinalizeOutcome::AlreadyRecorded
        } else {
            FinalizeOutcome::Recorded
        })
    }

    async fn append_entry(&self, round_id: u64, entry: &DatedEntry) -> Result<()> {
        insert_entry(&self.pool, round_id, entry).await?;
        Ok(())
    }

    /// Skipped when the round's most recent reveal already has this price,
    /// so a replayed reveal is a no-op but A, B, A keeps all three.
    async fn save_oracle_entry(&self, entry: &OracleEntry) -> Result<()> {
        let prices = encode_prices(&entry.external_prices)?;
        sqlx::query(
            r#"
            INSERT INTO oracles (
                round_id, oracle_price, recorded_at, time_left,
                seconds_since_candle_open, external_prices
            )
            SELECT ?, ?, ?, ?, ?, ?
            WHERE (
                SELECT oracle_price FROM oracles WHERE round_id = ?
                ORDER BY recorded_at DESC, id DESC LIMIT 1
            ) IS NOT ?
            "#,
        )
        .bind(entry.round_id as i64)
        .bind(entry.oracle_price)
        .bind(entry.recorded_at)
        .bind(entry.time_left.as_deref())
        .bind(entry.seconds_since_candle_open.map(i64::from))
        .bind(prices)
        .bind(entry.round_id as i64)
        .bind(entry.oracle_price)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn write_aggregate(&self, s: &AggregateStats) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO aggregates (
                id, total_payout, total_pool, total_diff_up, total_diff_down,
                safe_wins, risky_wins, safe_total_payout, risky_total_payout,
                nb_round_up, nb_round_down, nb_entries, computed_at
            ) VALUES (1, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                total_payout = excluded.total_payout,
                total_pool = excluded.total_pool,
                total_diff_up = excluded.total_diff_up,
                total_diff_down = excluded.total_diff_down,
                safe_wins = excluded.safe_wins,
                risky_wins = excluded.risky_wins,
                safe_total_payout = excluded.safe_total_payout,
                risky_total_payout = excluded.risky_total_payout,
                nb_round_up = excluded.nb_round_up,
                nb_round_down = excluded.nb_round_down,
                nb_entries = excluded.nb_entries,
                computed_at = excluded.computed_at
            "#,
        )
        .bind(s.total_payout)
        .bind(s.total_pool)
        .bind(s.total_diff_up)
        .bind(s.total_diff_down)
        .bind(s.safe_wins as i64)
        .bind(s.risky_wins as i64)
        .bind(s.safe_total_payout)
        .bind(s.risky_total_payout)
        .bind(s.nb_round_up as i64)
        .bind(s.nb_round_down as i64)
        .bind(s.nb_entries as i64)
        .bind(s.computed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn read_aggregate(&self) -> Result<Option<AggregateStats>> {
        let row: Option<AggregateRow> = sqlx::query_as(
            r#"
            SELECT total_payout, total_pool, total_diff_up, total_diff_down,
                   safe_wins, risky_wins, safe_total_payout, risky_total_payout,
                   nb_round_up, nb_round_down, nb_entries, computed_at
            FROM aggregates WHERE id = 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(AggregateStats::from))
    }

    async fn latest_round_id(&self) -> Result<Option<u64>> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(round_id) FROM rounds")
            .fetch_one(&self.pool)
            .await?;
        Ok(max.map(|id| id as u64))
    }

    async fn list_oracle_entries(&self) -> Result<Vec<OracleEntry>> {
        let rows: Vec<OracleRow> = sqlx::query_as(
            r#"
            SELECT round_id, oracle_price, recorded_at, time_left,
                   seconds_since_candle_open, external_prices
            FROM oracles ORDER BY recorded_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(OracleEntry::from).collect())
    }

    async fn recent_rounds(&self, limit: i64) -> Result<Vec<RoundHeader>> {
        let rows: Vec<RoundRow> = sqlx::query_as(&format!(
            "SELECT {ROUND_COLUMNS} FROM rounds ORDER BY closed_at DESC, round_id DESC LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RoundHeader::from).collect())
    }

    async fn round_entries(&self, round_id: u64) -> Result<Vec<DatedEntry>> {
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT {ENTRY_COLUMNS} FROM round_entries WHERE round_id = ? ORDER BY recorded_at ASC"
        ))
        .bind(round_id as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(DatedEntry::from).collect())
    }
}
