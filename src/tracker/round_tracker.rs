use std::collections::BTreeMap;

use crate::types::{
    DatedEntry, Direction, OracleEntry, RoundHeader, RoundRecord, Slot, Snapshot, TrackerEvent,
};

/// Last accepted live and next heads.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackerState {
    pub live: Option<Snapshot>,
    pub next: Option<Snapshot>,
}

/// Output of [`RoundTracker::plan`]: the events of one pass plus the state
/// that becomes current once they are all persisted.
#[derive(Debug)]
pub struct Reconciliation {
    pub events: Vec<TrackerEvent>,
    state: TrackerState,
    series: BTreeMap<u64, Vec<DatedEntry>>,
    last_finalized: Option<u64>,
}

/// Follows the live/next round pair across polls and turns slot movements
/// into lifecycle events. Owned by the poll loop; never shared.
#[derive(Debug, Default)]
pub struct RoundTracker {
    state: TrackerState,
    /// Entry series of rounds not yet finalized, keyed by round id.
    series: BTreeMap<u64, Vec<DatedEntry>>,
    last_finalized: Option<u64>,
}

impl RoundTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn series(&self, round_id: u64) -> &[DatedEntry] {
        self.series.get(&round_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn last_finalized(&self) -> Option<u64> {
        self.last_finalized
    }

    /// Computes this pass's events without touching `self`.
    pub fn plan(
        &self,
        live: &Snapshot,
        next: &Snapshot,
        closing: Option<&Snapshot>,
    ) -> Reconciliation {
        let mut state = self.state.clone();
        let mut series = self.series.clone();
        let mut last_finalized = self.last_finalized;
        let mut events = Vec::new();

        // Oracle known for this exact round, if any.
        let known_oracle = self
            .state
            .live
            .as_ref()
            .filter(|h| h.round_id == live.round_id)
            .and_then(|h| h.oracle_price);
        let oracle_changed = live.oracle_price.is_some() && live.oracle_price != known_oracle;

        if let (true, Some(price)) = (oracle_changed, live.oracle_price) {
            events.push(TrackerEvent::OracleRevealed(OracleEntry {
                round_id: live.round_id,
                oracle_price: price,
                recorded_at: live.timestamp,
                time_left: live.time_left.clone(),
                seconds_since_candle_open: live.seconds_since_candle_open,
                external_prices: live.external_prices.clone(),
            }));
        }

        if let Some(prev) = self.state.live.as_ref() {
            if prev.round_id != live.round_id && last_finalized != Some(prev.round_id) {
                let record = close_round(prev, closing, live.timestamp, &mut series);
                series.retain(|id, _| *id > prev.round_id);
                last_finalized = Some(prev.round_id);
                events.push(TrackerEvent::RoundClosed(record));
            }
        }

        let next_id_changed = self.state.next.as_ref().map(|n| n.round_id) != Some(next.round_id);
        if next_id_changed {
            series.entry(next.round_id).or_default();
            events.push(TrackerEvent::RoundOpened {
                round_id: next.round_id,
            });
        }

        let next_pool_changed = self
            .state
            .next
            .as_ref()
            .is_some_and(|n| n.pool_value != next.pool_value);
        if next_id_changed || next_pool_changed {
            let entry = DatedEntry::from_snapshot(next, Slot::Next);
            push_entry(&mut series, next.round_id, &entry);
            state.next = Some(next.clone());
            events.push(TrackerEvent::NextUpdated {
                round_id: next.round_id,
                entry,
            });
        }

        if oracle_changed || live.round_id != next.round_id {
            let entry = oracle_changed.then(|| DatedEntry::from_snapshot(live, Slot::Live));
            if let Some(e) = &entry {
                push_entry(&mut series, live.round_id, e);
            }
            state.live = Some(live.clone());
            events.push(TrackerEvent::LiveUpdated {
                round_id: live.round_id,
                entry,
            });
        }

        Reconciliation {
            events,
            state,
            series,
            last_finalized,
        }
    }

    /// Installs the state computed by `plan`. Call only after every event of
    /// that plan was persisted.
    pub fn commit(&mut self, plan: Reconciliation) {
        self.state = plan.state;
        self.series = plan.series;
        self.last_finalized = plan.last_finalized;
    }

    /// `plan` followed by `commit`, for callers with nothing to persist.
    pub fn reconcile(
        &mut self,
        live: &Snapshot,
        next: &Snapshot,
        closing: Option<&Snapshot>,
    ) -> Vec<TrackerEvent> {
        let mut plan = self.plan(live, next, closing);
        let events = std::mem::take(&mut plan.events);
        self.commit(plan);
        events
    }
}

/// Header values come from the settled closing card when it describes the
/// same round, else from the last live head seen for it.
fn close_round(
    prev: &Snapshot,
    closing: Option<&Snapshot>,
    closed_at: i64,
    series: &mut BTreeMap<u64, Vec<DatedEntry>>,
) -> RoundRecord {
    let source = closing
        .filter(|c| c.round_id == prev.round_id && c.price_diff.is_some())
        .unwrap_or(prev);
    let price_diff = source.price_diff.or(prev.price_diff).unwrap_or_default();
    let entries = series.remove(&prev.round_id).unwrap_or_default();

    RoundRecord {
        header: RoundHeader {
            round_id: prev.round_id,
            price_diff,
            payout_up: source.payout_up,
            payout_down: source.payout_down,
            pool_value: source.pool_value,
            winner: Direction::from_diff(price_diff),
            opened_at: entries.first().map(|e| e.recorded_at),
            closed_at,
            backfilled: false,
        },
        entries,
    }
}

fn push_entry(series: &mut BTreeMap<u64, Vec<DatedEntry>>, round_id: u64, entry: &DatedEntry) {
    let list = series.entry(round_id).or_default();
    if list.iter().all(|e| e.recorded_at != entry.recorded_at) {
        list.push(entry.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashSet};

    use super::*;

    fn snap(round_id: u64, pool: f64, diff: Option<f64>, oracle: Option<f64>, ts: i64) -> Snapshot {
        Snapshot {
            round_id,
            pool_value: pool,
            payout_up: 1.9,
            payout_down: 2.1,
            price_diff: diff,
            oracle_price: oracle,
            timestamp: ts,
            time_left: None,
            seconds_since_candle_open: None,
            external_prices: BTreeMap::new(),
        }
    }

    fn closed(events: &[TrackerEvent]) -> Vec<&RoundRecord> {
        events
            .iter()
            .filter_map(|e| match e {
                TrackerEvent::RoundClosed(r) => Some(r),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn first_pass_opens_next_and_tracks_live() {
        let mut t = RoundTracker::new();
        let events = t.reconcile(
            &snap(10, 5.0, Some(0.3), None, 1_000),
            &snap(11, 1.0, None, None, 1_000),
            None,
        );

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], TrackerEvent::RoundOpened { round_id: 11 }));
        assert!(matches!(events[1], TrackerEvent::NextUpdated { round_id: 11, .. }));
        assert!(matches!(
            events[2],
            TrackerEvent::LiveUpdated { round_id: 10, entry: None }
        ));
        assert_eq!(t.series(11).len(), 1);
        assert_eq!(t.state().live.as_ref().map(|s| s.round_id), Some(10));
    }

    #[test]
    fn oracle_reveal_fires_on_strict_change_only() {
        let mut t = RoundTracker::new();
        let next = snap(11, 1.0, None, None, 0);
        t.reconcile(&snap(10, 5.0, Some(0.3), None, 1_000), &next, None);

        let events = t.reconcile(&snap(10, 5.0, Some(0.3), Some(600.5), 2_000), &next, None);
        assert!(matches!(&events[0], TrackerEvent::OracleRevealed(o) if o.oracle_price == 600.5));
        assert_eq!(t.series(10).len(), 1);

        let events = t.reconcile(&snap(10, 5.0, Some(0.3), Some(600.5), 3_000), &next, None);
        assert!(!events
            .iter()
            .any(|e| matches!(e, TrackerEvent::OracleRevealed(_))));
        assert_eq!(t.series(10).len(), 1);
    }

    #[test]
    fn close_uses_closing_card_and_series() {
        let mut t = RoundTracker::new();
        t.reconcile(
            &snap(10, 5.0, Some(0.3), None, 1_000),
            &snap(11, 1.0, None, None, 1_000),
            None,
        );
        t.reconcile(
            &snap(10, 5.0, Some(0.3), None, 2_000),
            &snap(11, 2.0, None, None, 2_000),
            None,
        );

        let closing = snap(10, 6.0, Some(-1.25), None, 3_000);
        let events = t.reconcile(
            &snap(11, 2.5, Some(0.1), None, 3_000),
            &snap(12, 0.5, None, None, 3_000),
            Some(&closing),
        );

        let records = closed(&events);
        assert_eq!(records.len(), 1);
        let h = &records[0].header;
        assert_eq!(h.round_id, 10);
        assert_eq!(h.price_diff, -1.25);
        assert_eq!(h.winner, Direction::Down);
        assert_eq!(h.pool_value, 6.0);
        assert_eq!(h.closed_at, 3_000);
        // Round 10 was live from the first pass and never got an entry.
        assert!(records[0].entries.is_empty());
        assert_eq!(t.last_finalized(), Some(10));
        assert_eq!(t.series(11).len(), 2);
    }

    #[test]
    fn close_falls_back_to_live_head() {
        let mut t = RoundTracker::new();
        t.reconcile(
            &snap(10, 5.0, Some(0.3), None, 1_000),
            &snap(11, 1.0, None, None, 1_000),
            None,
        );
        let stray = snap(9, 6.0, Some(-4.0), None, 2_000);
        let events = t.reconcile(
            &snap(11, 2.5, Some(0.1), None, 2_000),
            &snap(12, 0.5, None, None, 2_000),
            Some(&stray),
        );

        let h = &closed(&events)[0].header;
        assert_eq!(h.round_id, 10);
        assert_eq!(h.price_diff, 0.3);
        assert_eq!(h.winner, Direction::Up);
    }

    #[test]
    fn plan_without_commit_replays_the_same_close() {
        let mut t = RoundTracker::new();
        t.reconcile(
            &snap(10, 5.0, Some(0.3), None, 1_000),
            &snap(11, 1.0, None, None, 1_000),
            None,
        );
        let live = snap(11, 2.5, Some(0.1), None, 2_000);
        let next = snap(12, 0.5, None, None, 2_000);

        let first = t.plan(&live, &next, None);
        assert_eq!(closed(&first.events).len(), 1);

        let second = t.plan(&live, &next, None);
        assert_eq!(closed(&second.events).len(), 1);
        t.commit(second);

        let third = t.reconcile(&live, &next, None);
        assert!(closed(&third).is_empty());
    }

    #[test]
    fn contiguous_rounds_finalize_once_without_duplicate_entries() {
        let mut t = RoundTracker::new();
        let mut finalized = Vec::new();
        let mut ts = 0;

        for id in 100..110u64 {
            // Three polls per round; the next pool grows and the oracle appears once.
            for step in 0..3 {
                ts += 10_000;
                let oracle = (step > 0).then_some(600.0 + id as f64);
                let live = snap(id, 5.0, Some(if id % 2 == 0 { 1.0 } else { -1.0 }), oracle, ts);
                let next = snap(id + 1, 1.0 + step as f64, None, None, ts);
                for r in closed(&t.reconcile(&live, &next, None)) {
                    let times: HashSet<i64> = r.entries.iter().map(|e| e.recorded_at).collect();
                    assert_eq!(times.len(), r.entries.len());
                    finalized.push(r.header.round_id);
                }
            }
        }

        assert_eq!(finalized, (100..109).collect::<Vec<_>>());
    }

    #[test]
    fn close_prunes_older_series() {
        let mut t = RoundTracker::new();
        t.reconcile(
            &snap(10, 5.0, Some(0.3), None, 1_000),
            &snap(11, 1.0, None, None, 1_000),
            None,
        );
        t.reconcile(
            &snap(11, 2.5, Some(0.1), None, 2_000),
            &snap(12, 0.5, None, None, 2_000),
            None,
        );
        t.reconcile(
            &snap(12, 0.5, Some(0.1), None, 3_000),
            &snap(13, 0.5, None, None, 3_000),
            None,
        );

        assert!(t.series(11).is_empty());
        assert_eq!(t.series(12).len(), 1);
        assert_eq!(t.series(13).len(), 1);
    }
}
