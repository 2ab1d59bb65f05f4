//! In-memory fakes for the source and store seams.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::db::Gateway;
use crate::error::{AppError, Result};
use crate::source::SnapshotSource;
use crate::stats::AggregateStats;
use crate::types::{
    DatedEntry, FinalizeOutcome, OracleEntry, PollContext, RawSnapshot, RoundHeader, RoundRecord,
    SnapshotPair,
};

pub fn raw(round_id: u64, pool: &str, up: &str, down: &str, diff: Option<&str>) -> RawSnapshot {
    RawSnapshot {
        round_id: Some(format!("#{round_id}")),
        pool_value: Some(pool.to_string()),
        payout_up: Some(up.to_string()),
        payout_down: Some(down.to_string()),
        price_diff: diff.map(str::to_string),
        oracle_price: None,
    }
}

pub fn pair(live: RawSnapshot, next: RawSnapshot, captured_at: i64) -> SnapshotPair {
    SnapshotPair {
        live,
        next,
        closing: None,
        context: PollContext {
            captured_at,
            ..Default::default()
        },
    }
}

#[derive(Default)]
pub struct FakeSource {
    pairs: Mutex<VecDeque<Result<SnapshotPair>>>,
    expired: Mutex<Vec<RawSnapshot>>,
    stalled: AtomicBool,
    pub calls: AtomicUsize,
}

impl FakeSource {
    pub fn push(&self, pair: SnapshotPair) {
        self.pairs.lock().unwrap().push_back(Ok(pair));
    }

    pub fn push_err(&self, e: AppError) {
        self.pairs.lock().unwrap().push_back(Err(e));
    }

    /// While set, snapshot fetches never resolve.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn set_expired(&self, cards: Vec<RawSnapshot>) {
        *self.expired.lock().unwrap() = cards;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    async fn fetch_snapshot_pair(&self) -> Result<SnapshotPair> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.pairs
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AppError::Source("no snapshot queued".into())))
    }

    async fn fetch_expired_candidates(&self) -> Result<Vec<RawSnapshot>> {
        Ok(self.expired.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct Store {
    rounds: BTreeMap<u64, RoundHeader>,
    entries: BTreeMap<u64, Vec<DatedEntry>>,
    oracles: Vec<OracleEntry>,
    aggregate: Option<AggregateStats>,
}

/// Gateway with the same idempotency as the SQLite store, plus call counting
/// and switchable failure.
#[derive(Default)]
pub struct MemoryGateway {
    store: Mutex<Store>,
    failing: AtomicBool,
    stalled: AtomicBool,
    pub calls: AtomicUsize,
}

impl MemoryGateway {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// While set, every call hangs instead of answering.
    pub fn set_stalled(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn rounds(&self) -> Vec<RoundHeader> {
        self.store.lock().unwrap().rounds.values().cloned().collect()
    }

    pub fn entries(&self, round_id: u64) -> Vec<DatedEntry> {
        self.store
            .lock()
            .unwrap()
            .entries
            .get(&round_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn oracles(&self) -> Vec<OracleEntry> {
        self.store.lock().unwrap().oracles.clone()
    }

    pub fn insert_round(&self, header: RoundHeader) {
        self.store.lock().unwrap().rounds.insert(header.round_id, header);
    }

    async fn enter(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(AppError::PersistenceUnavailable("store offline".into()));
        }
        Ok(())
    }
}

fn merge_entry(series: &mut Vec<DatedEntry>, entry: &DatedEntry) {
    if !series.iter().any(|e| e.recorded_at == entry.recorded_at) {
        series.push(entry.clone());
        series.sort_by_key(|e| e.recorded_at);
    }
}

#[async_trait]
impl Gateway for MemoryGateway {
    async fn list_all_rounds(&self) -> Result<Vec<RoundHeader>> {
        self.enter().await?;
        Ok(self.rounds())
    }

    async fn save_finalized_round(&self, record: &RoundRecord) -> Result<FinalizeOutcome> {
        self.enter().await?;
        let mut store = self.store.lock().unwrap();
        let id = record.header.round_id;
        let series = store.entries.entry(id).or_default();
        for e in &record.entries {
            merge_entry(series, e);
        }
        if store.rounds.contains_key(&id) {
            return Ok(FinalizeOutcome::AlreadyRecorded);
        }
        store.rounds.insert(id, record.header.clone());
        Ok(FinalizeOutcome::Recorded)
    }

    async fn append_entry(&self, round_id: u64, entry: &DatedEntry) -> Result<()> {
        self.enter().await?;
        let mut store = self.store.lock().unwrap();
        merge_entry(store.entries.entry(round_id).or_default(), entry);
        Ok(())
    }

    async fn save_oracle_entry(&self, entry: &OracleEntry) -> Result<()> {
        self.enter().await?;
        let mut store = self.store.lock().unwrap();
        let latest = store
            .oracles
            .iter()
            .filter(|o| o.round_id == entry.round_id)
            .max_by_key(|o| o.recorded_at)
            .map(|o| o.oracle_price);
        if latest != Some(entry.oracle_price) {
            store.oracles.push(entry.clone());
        }
        Ok(())
    }

    async fn write_aggregate(&self, stats: &AggregateStats) -> Result<()> {
        self.enter().await?;
        self.store.lock().unwrap().aggregate = Some(stats.clone());
        Ok(())
    }

    async fn read_aggregate(&self) -> Result<Option<AggregateStats>> {
        self.enter().await?;
        Ok(self.store.lock().unwrap().aggregate.clone())
    }

    async fn latest_round_id(&self) -> Result<Option<u64>> {
        self.enter().await?;
        Ok(self.store.lock().unwrap().rounds.keys().next_back().copied())
    }

    async fn list_oracle_entries(&self) -> Result<Vec<OracleEntry>> {
        self.enter().await?;
        Ok(self.oracles())
    }

    async fn recent_rounds(&self, limit: i64) -> Result<Vec<RoundHeader>> {
        self.enter().await?;
        let mut rounds = self.rounds();
        rounds.sort_by(|a, b| b.closed_at.cmp(&a.closed_at).then(b.round_id.cmp(&a.round_id)));
        rounds.truncate(limit.max(0) as usize);
        Ok(rounds)
    }

    async fn round_entries(&self, round_id: u64) -> Result<Vec<DatedEntry>> {
        self.enter().await?;
        Ok(self.entries(round_id))
    }
}
