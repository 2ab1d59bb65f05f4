use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::api::health::HealthState;
use crate::api::latency::LatencyStats;
use crate::db::Gateway;
use crate::error::{AppError, Result};
use crate::normalizer::normalize;
use crate::source::SnapshotSource;
use crate::tracker::round_tracker::RoundTracker;
use crate::types::{
    now_ms, Direction, FinalizeOutcome, RoundHeader, RoundRecord, Slot, TrackerEvent,
};

/// The poll loop: fetch, normalize, reconcile, persist, commit.
/// Owns the `RoundTracker`; one cycle at a time.
pub struct RoundPoller {
    source: Arc<dyn SnapshotSource>,
    gateway: Arc<dyn Gateway>,
    tracker: RoundTracker,
    health: Arc<HealthState>,
    latency: Arc<LatencyStats>,
    fetch_timeout: Duration,
    persist_timeout: Duration,
}

impl RoundPoller {
    pub fn new(
        source: Arc<dyn SnapshotSource>,
        gateway: Arc<dyn Gateway>,
        health: Arc<HealthState>,
        latency: Arc<LatencyStats>,
        fetch_timeout: Duration,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            source,
            gateway,
            tracker: RoundTracker::new(),
            health,
            latency,
            fetch_timeout,
            persist_timeout,
        }
    }

    pub async fn run(mut self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            let started = Instant::now();
            match self.cycle().await {
                Ok(()) => self.latency.record(started.elapsed()),
                Err(AppError::StaleSource(last)) => {
                    debug!(last_round = ?last, "Poll skipped: source DOWN");
                }
                Err(e) => {
                    self.latency.record(started.elapsed());
                    if e.is_persistence() {
                        warn!("Poll cycle not committed, will replay: {e}");
                    } else {
                        warn!("Poll cycle skipped: {e}");
                    }
                }
            }
        }
    }

    /// One poll. State is committed only when every write of the pass
    /// succeeded; any error leaves the tracker exactly as it was.
    pub async fn cycle(&mut self) -> Result<()> {
        if !self.health.is_up() {
            self.health.inc_cycles_paused();
            return Err(AppError::StaleSource(self.health.last_round_id()));
        }

        let pair = timeout(self.fetch_timeout, self.source.fetch_snapshot_pair())
            .await
            .map_err(|_| AppError::Source("snapshot fetch timed out".into()))??;
        let ctx = &pair.context;

        let live = normalize(&pair.live, Slot::Live, ctx)?;
        let next = normalize(&pair.next, Slot::Next, ctx)?;
        let closing = match pair.closing.as_ref().map(|raw| normalize(raw, Slot::Live, ctx)) {
            Some(Ok(s)) => Some(s),
            Some(Err(e)) => {
                warn!("Closing card ignored: {e}");
                None
            }
            None => None,
        };

        let plan = self.tracker.plan(&live, &next, closing.as_ref());
        for event in &plan.events {
            self.apply(event).await?;
        }
        self.tracker.commit(plan);
        self.health.record_cycle(now_ms().max(0) as u64);

        self.sweep_expired(live.round_id).await;
        Ok(())
    }

    async fn apply(&self, event: &TrackerEvent) -> Result<()> {
        match event {
            TrackerEvent::OracleRevealed(o) => {
                self.persist(self.gateway.save_oracle_entry(o)).await?;
                info!(
                    round_id = o.round_id,
                    oracle_price = o.oracle_price,
                    "ORACLE | #{} | price: {:.4}",
                    o.round_id,
                    o.oracle_price,
                );
            }
            TrackerEvent::RoundClosed(record) => {
                match self.persist(self.gateway.save_finalized_round(record)).await? {
                    FinalizeOutcome::Recorded => log_round_closed(record),
                    FinalizeOutcome::AlreadyRecorded => {
                        debug!(round_id = record.header.round_id, "Round already recorded")
                    }
                }
            }
            TrackerEvent::RoundOpened { round_id } => {
                debug!(round_id, "Round opened");
            }
            TrackerEvent::NextUpdated { round_id, entry } => {
                self.persist(self.gateway.append_entry(*round_id, entry)).await?;
            }
            TrackerEvent::LiveUpdated {
                round_id,
                entry: Some(entry),
            } => {
                self.persist(self.gateway.append_entry(*round_id, entry)).await?;
            }
            TrackerEvent::LiveUpdated { entry: None, .. } => {}
        }
        Ok(())
    }

    /// Backfills settled rounds the tracker never saw close, e.g. across a
    /// restart. Failures are logged and never fail the cycle.
    async fn sweep_expired(&self, live_round_id: u64) {
        let candidates =
            match timeout(self.fetch_timeout, self.source.fetch_expired_candidates()).await {
                Ok(Ok(c)) => c,
                Ok(Err(e)) => {
                    debug!("Expired sweep skipped: {e}");
                    return;
                }
                Err(_) => {
                    debug!("Expired sweep timed out");
                    return;
                }
            };

        let closed_at = now_ms();
        let mut recorded = 0usize;
        for raw in &candidates {
            let snap = match normalize(raw, Slot::Live, &Default::default()) {
                Ok(s) if s.round_id < live_round_id => s,
                Ok(_) => continue,
                Err(e) => {
                    debug!("Expired card ignored: {e}");
                    continue;
                }
            };
            let price_diff = snap.price_diff.unwrap_or_default();
            let record = RoundRecord {
                header: RoundHeader {
                    round_id: snap.round_id,
                    price_diff,
                    payout_up: snap.payout_up,
                    payout_down: snap.payout_down,
                    pool_value: snap.pool_value,
                    winner: Direction::from_diff(price_diff),
                    opened_at: None,
                    closed_at,
                    backfilled: true,
                },
                entries: Vec::new(),
            };
            match self.persist(self.gateway.save_finalized_round(&record)).await {
                Ok(FinalizeOutcome::Recorded) => recorded += 1,
                Ok(FinalizeOutcome::AlreadyRecorded) => {}
                Err(e) => {
                    warn!(round_id = snap.round_id, "Expired backfill failed: {e}");
                    return;
                }
            }
        }
        if recorded > 0 {
            info!("Backfilled {recorded} expired rounds");
        }
    }

    async fn persist<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        timeout(self.persist_timeout, fut)
            .await
            .map_err(|_| AppError::PersistenceUnavailable("gateway call timed out".into()))?
    }
}

fn log_round_closed(r: &RoundRecord) {
    let h = &r.header;
    info!(
        event = "ROUND_CLOSED",
        round_id = h.round_id,
        winner = %h.winner,
        price_diff = h.price_diff,
        payout = h.winning_payout(),
        pool = h.pool_value,
        entries = r.entries.len(),
        "ROUND CLOSED | #{} | winner: {} | diff: {:+.4} | payout: {:.2}x ({:?}) | pool: {:.3} | entries: {}",
        h.round_id,
        h.winner,
        h.price_diff,
        h.winning_payout(),
        h.risk_bucket(),
        h.pool_value,
        r.entries.len(),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{pair, raw, FakeSource, MemoryGateway};
    use crate::types::SourceStatus;

    struct Fixture {
        src: Arc<FakeSource>,
        gw: Arc<MemoryGateway>,
        health: Arc<HealthState>,
        poller: RoundPoller,
    }

    fn fixture() -> Fixture {
        let src = Arc::new(FakeSource::default());
        let gw = Arc::new(MemoryGateway::default());
        let health = Arc::new(HealthState::new());
        let poller = RoundPoller::new(
            src.clone(),
            gw.clone(),
            health.clone(),
            Arc::new(LatencyStats::new()),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        Fixture {
            src,
            gw,
            health,
            poller,
        }
    }

    fn live(id: u64, diff: &str) -> crate::types::RawSnapshot {
        raw(id, "5.2 BNB", "1.80x", "2.25x", Some(diff))
    }

    fn next(id: u64, pool: &str) -> crate::types::RawSnapshot {
        raw(id, pool, "1.00x", "1.00x", None)
    }

    #[tokio::test]
    async fn paused_cycle_touches_nothing() {
        let mut f = fixture();
        f.health.set_status(SourceStatus::Down);
        f.health.set_last_round_id(Some(77));

        let err = f.poller.cycle().await.unwrap_err();
        assert!(matches!(err, AppError::StaleSource(Some(77))));
        assert_eq!(f.src.calls(), 0);
        assert_eq!(f.gw.calls(), 0);
        assert_eq!(f.health.cycles_paused(), 1);
        assert_eq!(f.poller.tracker.state().live, None);
    }

    #[tokio::test]
    async fn failed_write_keeps_state_and_replays_once() {
        let mut f = fixture();
        f.src.push(pair(live(10, "+$0.50"), next(11, "1.0"), 1_000));
        f.poller.cycle().await.unwrap();

        f.gw.set_failing(true);
        f.src.push(pair(live(11, "-$0.10"), next(12, "0.4"), 2_000));
        let err = f.poller.cycle().await.unwrap_err();
        assert!(err.is_persistence());
        assert_eq!(f.poller.tracker.state().live.as_ref().map(|s| s.round_id), Some(10));
        assert!(f.gw.rounds().is_empty());

        f.gw.set_failing(false);
        f.src.push(pair(live(11, "-$0.10"), next(12, "0.4"), 3_000));
        f.poller.cycle().await.unwrap();
        f.src.push(pair(live(11, "-$0.12"), next(12, "0.6"), 4_000));
        f.poller.cycle().await.unwrap();

        let rounds = f.gw.rounds();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].round_id, 10);
        assert_eq!(rounds[0].winner, Direction::Up);
        assert_eq!(rounds[0].closed_at, 3_000);
        assert_eq!(f.poller.tracker.last_finalized(), Some(10));
        assert_eq!(f.health.cycles_run(), 3);
    }

    #[tokio::test]
    async fn malformed_snapshot_skips_cycle() {
        let mut f = fixture();
        f.src.push(pair(raw(10, "n/a", "1.8x", "2.2x", Some("0.1")), next(11, "1"), 1_000));

        let err = f.poller.cycle().await.unwrap_err();
        assert!(matches!(err, AppError::MalformedSnapshot(_)));
        assert_eq!(f.gw.calls(), 0);
        assert_eq!(f.poller.tracker.state().live, None);
        assert_eq!(f.health.cycles_run(), 0);
    }

    #[tokio::test]
    async fn live_without_diff_is_malformed() {
        let mut f = fixture();
        f.src.push(pair(raw(10, "5", "1.8x", "2.2x", None), next(11, "1"), 1_000));
        assert!(matches!(
            f.poller.cycle().await.unwrap_err(),
            AppError::MalformedSnapshot(_)
        ));
    }

    #[tokio::test]
    async fn source_error_is_retryable() {
        let mut f = fixture();
        f.src.push_err(AppError::Source("connection refused".into()));
        assert!(matches!(f.poller.cycle().await.unwrap_err(), AppError::Source(_)));

        f.src.push(pair(live(10, "0.5"), next(11, "1"), 1_000));
        f.poller.cycle().await.unwrap();
    }

    #[tokio::test]
    async fn next_series_is_persisted_as_it_grows() {
        let mut f = fixture();
        f.src.push(pair(live(10, "0.5"), next(11, "1.0"), 1_000));
        f.poller.cycle().await.unwrap();
        f.src.push(pair(live(10, "0.5"), next(11, "1.0"), 2_000));
        f.poller.cycle().await.unwrap();
        f.src.push(pair(live(10, "0.5"), next(11, "2.5"), 3_000));
        f.poller.cycle().await.unwrap();

        let times: Vec<i64> = f.gw.entries(11).iter().map(|e| e.recorded_at).collect();
        assert_eq!(times, vec![1_000, 3_000]);
    }

    #[tokio::test]
    async fn oracle_reveal_is_saved_once() {
        let mut f = fixture();
        let mut revealed = live(10, "0.5");
        revealed.oracle_price = Some("$612.40".into());

        f.src.push(pair(live(10, "0.5"), next(11, "1"), 1_000));
        f.poller.cycle().await.unwrap();
        f.src.push(pair(revealed.clone(), next(11, "1"), 2_000));
        f.poller.cycle().await.unwrap();
        f.src.push(pair(revealed, next(11, "1"), 3_000));
        f.poller.cycle().await.unwrap();

        let oracles = f.gw.oracles();
        assert_eq!(oracles.len(), 1);
        assert_eq!(oracles[0].oracle_price, 612.4);
        assert_eq!(oracles[0].recorded_at, 2_000);
        assert_eq!(f.gw.entries(10).len(), 1);
    }

    #[tokio::test]
    async fn sweep_backfills_older_expired_rounds() {
        let mut f = fixture();
        f.src.set_expired(vec![
            raw(7, "3.0", "1.5x", "2.9x", Some("-0.4")),
            raw(8, "3.0", "1.5x", "2.9x", None),
            raw(10, "3.0", "1.5x", "2.9x", Some("0.4")),
        ]);
        f.src.push(pair(live(10, "0.5"), next(11, "1"), 1_000));
        f.poller.cycle().await.unwrap();

        let ids: Vec<u64> = f.gw.rounds().iter().map(|r| r.round_id).collect();
        assert_eq!(ids, vec![7]);
        assert_eq!(f.gw.rounds()[0].winner, Direction::Down);
        assert!(f.gw.rounds()[0].backfilled);
    }

    #[tokio::test]
    async fn oracle_returning_to_an_earlier_price_is_kept() {
        let mut f = fixture();
        let with_oracle = |price: &str| {
            let mut card = live(10, "0.5");
            card.oracle_price = Some(price.into());
            card
        };

        f.src.push(pair(with_oracle("$600.10"), next(11, "1"), 10_000));
        f.poller.cycle().await.unwrap();
        f.src.push(pair(with_oracle("$600.40"), next(11, "1"), 60_000));
        f.poller.cycle().await.unwrap();
        f.src.push(pair(with_oracle("$600.10"), next(11, "1"), 120_000));
        f.poller.cycle().await.unwrap();

        let times: Vec<i64> = f.gw.oracles().iter().map(|o| o.recorded_at).collect();
        assert_eq!(times, vec![10_000, 60_000, 120_000]);
    }

    #[tokio::test(start_paused = true)]
    async fn hung_fetch_abandons_cycle() {
        let mut f = fixture();
        f.src.set_stalled(true);

        let err = f.poller.cycle().await.unwrap_err();
        assert!(matches!(err, AppError::Source(_)));
        assert_eq!(f.gw.calls(), 0);
        assert_eq!(f.poller.tracker.state().live, None);
        assert_eq!(f.health.cycles_run(), 0);

        f.src.set_stalled(false);
        f.src.push(pair(live(10, "0.5"), next(11, "1"), 1_000));
        f.poller.cycle().await.unwrap();
        assert_eq!(f.poller.tracker.state().live.as_ref().map(|s| s.round_id), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn hung_store_is_not_committed_and_replays() {
        let mut f = fixture();
        f.src.push(pair(live(10, "+$0.50"), next(11, "1.0"), 1_000));
        f.poller.cycle().await.unwrap();

        f.gw.set_stalled(true);
        f.src.push(pair(live(11, "-$0.10"), next(12, "0.4"), 2_000));
        let err = f.poller.cycle().await.unwrap_err();
        assert!(matches!(err, AppError::PersistenceUnavailable(_)));
        assert_eq!(f.poller.tracker.state().live.as_ref().map(|s| s.round_id), Some(10));
        assert_eq!(f.poller.tracker.last_finalized(), None);
        assert!(f.gw.rounds().is_empty());

        f.gw.set_stalled(false);
        f.src.push(pair(live(11, "-$0.10"), next(12, "0.4"), 3_000));
        f.poller.cycle().await.unwrap();

        let rounds = f.gw.rounds();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].round_id, 10);
        assert_eq!(rounds[0].closed_at, 3_000);
        assert_eq!(f.poller.tracker.last_finalized(), Some(10));
        let times: Vec<i64> = f.gw.entries(12).iter().map(|e| e.recorded_at).collect();
        assert_eq!(times, vec![3_000]);
    }
}
