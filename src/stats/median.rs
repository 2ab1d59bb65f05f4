use serde::Serialize;

use crate::stats::aggregate::{format_avg, Stat};
use crate::types::RoundHeader;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Medians {
    pub payout: Stat,
    pub pool: Stat,
}

/// Winning-payout and pool medians over a set of finalized rounds.
pub fn medians(rounds: &[RoundHeader]) -> Medians {
    let mut payouts: Vec<f64> = rounds.iter().map(RoundHeader::winning_payout).collect();
    let mut pools: Vec<f64> = rounds.iter().map(|r| r.pool_value).collect();

    Medians {
        payout: midpoint(&mut payouts).map(format_avg).into(),
        pool: midpoint(&mut pools).map(format_avg).into(),
    }
}

/// Sorts ascending and takes the element at index `round(len / 2)`.
///
/// This is the dashboard's historical midpoint, not a statistical median:
/// `[1, 2, 3, 4, 5]` yields `4`. An index that falls past the end (a single
/// element) is clamped to the last one.
pub fn midpoint<T: PartialOrd + Copy>(values: &mut [T]) -> Option<T> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let idx = midpoint_index(values.len()).min(values.len() - 1);
    Some(values[idx])
}

fn midpoint_index(len: usize) -> usize {
    (len as f64 / 2.0).round() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn round(price_diff: f64, up: f64, down: f64, pool: f64) -> RoundHeader {
        RoundHeader {
            round_id: 1,
            price_diff,
            payout_up: up,
            payout_down: down,
            pool_value: pool,
            winner: Direction::from_diff(price_diff),
            opened_at: None,
            closed_at: 0,
            backfilled: false,
        }
    }

    #[test]
    fn odd_length_uses_rounded_half_index() {
        let mut v = [5, 3, 1, 4, 2];
        // round(5 / 2) = 3 → fourth smallest
        assert_eq!(midpoint(&mut v), Some(4));
    }

    #[test]
    fn even_length_takes_upper_middle() {
        let mut v = [10.0, 40.0, 20.0, 30.0];
        assert_eq!(midpoint(&mut v), Some(30.0));
    }

    #[test]
    fn single_element_is_clamped() {
        let mut v = [7];
        assert_eq!(midpoint(&mut v), Some(7));
        let mut empty: [i64; 0] = [];
        assert_eq!(midpoint(&mut empty), None);
    }

    #[test]
    fn medians_use_winning_side() {
        let rounds = vec![
            round(1.0, 1.5, 2.5, 10.0),  // pays 1.5
            round(-1.0, 1.5, 2.5, 30.0), // pays 2.5
            round(2.0, 1.9, 2.1, 20.0),  // pays 1.9
        ];
        let m = medians(&rounds);
        // sorted payouts [1.5, 1.9, 2.5], index round(1.5) = 2
        assert_eq!(m.payout, Stat::Available(2.5));
        assert_eq!(m.pool, Stat::Available(30.0));
        assert_eq!(medians(&[]).pool, Stat::Unavailable);
    }
}
