//! Distribution of the delay between consecutive oracle price reveals.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::oracle_gap;
use crate::stats::aggregate::{format_avg, Stat};
use crate::stats::median::midpoint;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapFrequency {
    /// Gap in whole seconds.
    pub value: i64,
    pub count: usize,
    /// Share of the kept gaps, three decimals.
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OracleTiming {
    pub average: Stat,
    pub median: Stat<i64>,
    /// One row per distinct kept gap, ascending by value.
    pub odds: Vec<GapFrequency>,
    /// Every consecutive gap before filtering.
    pub gaps: Vec<i64>,
}

/// `timestamps_ms` must be in reveal order.
pub fn oracle_timing(timestamps_ms: &[i64]) -> OracleTiming {
    let gaps: Vec<i64> = timestamps_ms
        .windows(2)
        .map(|w| ((w[1] - w[0]).abs() as f64 / 1000.0).round() as i64)
        .collect();

    let mut kept: Vec<i64> = gaps
        .iter()
        .copied()
        .filter(|g| *g > oracle_gap::MIN_SECS && *g < oracle_gap::MAX_SECS)
        .collect();

    if kept.is_empty() {
        return OracleTiming {
            average: Stat::Unavailable,
            median: Stat::Unavailable,
            odds: Vec::new(),
            gaps,
        };
    }

    let total = kept.len();
    let average = format_avg(kept.iter().sum::<i64>() as f64 / total as f64);
    let median = midpoint(&mut kept);

    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for gap in &kept {
        *counts.entry(*gap).or_default() += 1;
    }
    let odds = counts
        .into_iter()
        .map(|(value, count)| GapFrequency {
            value,
            count,
            percentage: round3(count as f64 / total as f64 * 100.0),
        })
        .collect();

    OracleTiming {
        average: Stat::Available(average),
        median: median.into(),
        odds,
        gaps,
    }
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}
