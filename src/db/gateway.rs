use async_trait::async_trait;

use crate::error::Result;
use crate::stats::AggregateStats;
use crate::types::{DatedEntry, FinalizeOutcome, OracleEntry, RoundHeader, RoundRecord};

/// Durable store for rounds, entry series, oracle reveals and the aggregate row.
///
/// Every write is idempotent: a replayed finalize, entry or oracle insert
/// leaves the store as it was after the first call.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Every finalized round header, oldest first.
    async fn list_all_rounds(&self) -> Result<Vec<RoundHeader>>;

    /// Persist the header once and merge the entry series by timestamp.
    async fn save_finalized_round(&self, record: &RoundRecord) -> Result<FinalizeOutcome>;

    async fn append_entry(&self, round_id: u64, entry: &DatedEntry) -> Result<()>;

    async fn save_oracle_entry(&self, entry: &OracleEntry) -> Result<()>;

    /// Replace the aggregate row in one write.
    async fn write_aggregate(&self, stats: &AggregateStats) -> Result<()>;

    async fn read_aggregate(&self) -> Result<Option<AggregateStats>>;

    /// Highest finalized round id.
    async fn latest_round_id(&self) -> Result<Option<u64>>;

    /// Every oracle reveal, in reveal order.
    async fn list_oracle_entries(&self) -> Result<Vec<OracleEntry>>;

    /// Most recently closed headers, newest first.
    async fn recent_rounds(&self, limit: i64) -> Result<Vec<RoundHeader>>;

    async fn round_entries(&self, round_id: u64) -> Result<Vec<DatedEntry>>;
}
