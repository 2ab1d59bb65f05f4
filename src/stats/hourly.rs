use std::collections::BTreeMap;

use serde::Serialize;

use crate::stats::aggregate::{averages, format_avg, AggregateStats, Stat};
use crate::types::RoundHeader;

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 86_400_000;

/// Bucket averages of one slice of rounds, tagged with its UTC hour.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyRecord {
    pub hour: u8,
    pub avg_safe: Stat,
    pub avg_risky: Stat,
    pub safe_percent_wr: Stat,
    pub risky_percent_wr: Stat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourlyAverages {
    pub hour: u8,
    pub count: usize,
    pub avg_safe: f64,
    pub avg_risky: f64,
    pub safe_percent_wr: f64,
    pub risky_percent_wr: f64,
}

#[derive(Default)]
struct HourAccumulator {
    count: usize,
    avg_safe: f64,
    avg_risky: f64,
    safe_percent_wr: f64,
    risky_percent_wr: f64,
}

/// Slices rounds by (UTC day, hour of close) and computes the bucket
/// averages of each slice. Backfilled rounds have no real close time and
/// are left out.
pub fn hourly_records(rounds: &[RoundHeader], bet_amount: f64) -> Vec<HourlyRecord> {
    let mut slices: BTreeMap<(i64, u8), Vec<RoundHeader>> = BTreeMap::new();
    for round in rounds.iter().filter(|r| !r.backfilled) {
        let day = round.closed_at.div_euclid(MS_PER_DAY);
        slices
            .entry((day, hour_of_day(round.closed_at)))
            .or_default()
            .push(round.clone());
    }

    slices
        .into_iter()
        .map(|((_, hour), slice)| {
            let stats = AggregateStats::from_rounds(&slice);
            let avg = averages(stats.as_ref(), bet_amount);
            HourlyRecord {
                hour,
                avg_safe: avg.avg_safe,
                avg_risky: avg.avg_risky,
                safe_percent_wr: avg.safe_percent_wr,
                risky_percent_wr: avg.risky_percent_wr,
            }
        })
        .collect()
}

/// Averages each field per hour of day. An unavailable figure adds 0 to the
/// sum but its record still counts in the divisor.
pub fn group_by_hour(records: &[HourlyRecord]) -> Vec<HourlyAverages> {
    let mut hours: BTreeMap<u8, HourAccumulator> = BTreeMap::new();
    for r in records {
        let acc = hours.entry(r.hour).or_default();
        acc.count += 1;
        acc.avg_safe += r.avg_safe.or_zero();
        acc.avg_risky += r.avg_risky.or_zero();
        acc.safe_percent_wr += r.safe_percent_wr.or_zero();
        acc.risky_percent_wr += r.risky_percent_wr.or_zero();
    }

    hours
        .into_iter()
        .map(|(hour, acc)| {
            let n = acc.count as f64;
            HourlyAverages {
                hour,
                count: acc.count,
                avg_safe: format_avg(acc.avg_safe / n),
                avg_risky: format_avg(acc.avg_risky / n),
                safe_percent_wr: format_avg(acc.safe_percent_wr / n),
                risky_percent_wr: format_avg(acc.risky_percent_wr / n),
            }
        })
        .collect()
}

fn hour_of_day(ms: i64) -> u8 {
    ms.div_euclid(MS_PER_HOUR).rem_euclid(24) as u8
}
