use serde::{Deserialize, Serialize, Serializer};

use crate::types::{Direction, RiskBucket, RoundHeader};

// ---------------------------------------------------------------------------
// Stat: a derived figure that may have no denominator yet
// ---------------------------------------------------------------------------

/// Serialized as the number, or `null` when unavailable. A zero denominator
/// is never reported as `0`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Stat<T = f64> {
    Available(T),
    Unavailable,
}

impl<T: Copy> Stat<T> {
    pub fn value(&self) -> Option<T> {
        match self {
            Stat::Available(v) => Some(*v),
            Stat::Unavailable => None,
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Stat::Available(_))
    }
}

impl Stat<f64> {
    /// `numerator / denominator`, rounded for display; unavailable on a zero denominator.
    pub fn ratio(numerator: f64, denominator: u64) -> Self {
        if denominator == 0 {
            Stat::Unavailable
        } else {
            Stat::Available(format_avg(numerator / denominator as f64))
        }
    }

    /// Contribution to a sum where a missing figure counts as zero.
    pub fn or_zero(&self) -> f64 {
        self.value().unwrap_or(0.0)
    }
}

impl<T> From<Option<T>> for Stat<T> {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => Stat::Available(v),
            None => Stat::Unavailable,
        }
    }
}

impl<T: Serialize> Serialize for Stat<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Stat::Available(v) => v.serialize(serializer),
            Stat::Unavailable => serializer.serialize_none(),
        }
    }
}

/// Two-decimal rounding, half-up, nudged by epsilon so `x.xx5` does not
/// truncate through binary representation error.
pub fn format_avg(value: f64) -> f64 {
    ((value + f64::EPSILON) * 100.0 + 0.5).floor() / 100.0
}

/// Expected gain of one bet: `p_win` in percent, `win` the payout multiple.
pub fn expected_value(p_win: f64, bet_amount: f64, win: f64) -> f64 {
    format_avg(
        (p_win / 100.0) * (win * bet_amount - bet_amount)
            - ((100.0 - p_win) / 100.0) * bet_amount,
    )
}

// ---------------------------------------------------------------------------
// AggregateStats: running totals over finalized rounds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateStats {
    pub total_payout: f64,
    pub total_pool: f64,
    pub total_diff_up: f64,
    pub total_diff_down: f64,
    pub safe_wins: u64,
    pub risky_wins: u64,
    pub safe_total_payout: f64,
    pub risky_total_payout: f64,
    pub nb_round_up: u64,
    pub nb_round_down: u64,
    pub nb_entries: u64,
    /// Unix milliseconds of the rebuild that produced these totals.
    pub computed_at: i64,
}

impl AggregateStats {
    /// Fold a full history. `None` when there is nothing to fold.
    pub fn from_rounds(rounds: &[RoundHeader]) -> Option<Self> {
        if rounds.is_empty() {
            return None;
        }
        let mut stats = Self::default();
        for round in rounds {
            stats.fold(round);
        }
        Some(stats)
    }

    fn fold(&mut self, round: &RoundHeader) {
        let payout = round.winning_payout();

        self.nb_entries += 1;
        self.total_payout += payout;
        self.total_pool += round.pool_value;

        match Direction::from_diff(round.price_diff) {
            Direction::Up => {
                self.nb_round_up += 1;
                self.total_diff_up += round.price_diff;
            }
            Direction::Down => {
                self.nb_round_down += 1;
                self.total_diff_down += round.price_diff;
            }
        }

        match round.risk_bucket() {
            RiskBucket::Safe => {
                self.safe_wins += 1;
                self.safe_total_payout += payout;
            }
            RiskBucket::Risky => {
                self.risky_wins += 1;
                self.risky_total_payout += payout;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Averages view
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Averages {
    pub avg_payout: Stat,
    pub avg_pool: Stat,
    pub avg_diff_up: Stat,
    pub avg_diff_down: Stat,
    pub avg_safe: Stat,
    pub avg_risky: Stat,
    pub safe_percent_wr: Stat,
    pub risky_percent_wr: Stat,
    /// Expected value of always betting the favorite, at the configured stake.
    pub expected_safe: Stat,
    /// Expected value of always betting the underdog.
    pub expected_risky: Stat,
    pub nb_round_up: Stat<u64>,
    pub nb_round_down: Stat<u64>,
    pub nb_entries: Stat<u64>,
}

impl Averages {
    pub fn unavailable() -> Self {
        Self {
            avg_payout: Stat::Unavailable,
            avg_pool: Stat::Unavailable,
            avg_diff_up: Stat::Unavailable,
            avg_diff_down: Stat::Unavailable,
            avg_safe: Stat::Unavailable,
            avg_risky: Stat::Unavailable,
            safe_percent_wr: Stat::Unavailable,
            risky_percent_wr: Stat::Unavailable,
            expected_safe: Stat::Unavailable,
            expected_risky: Stat::Unavailable,
            nb_round_up: Stat::Unavailable,
            nb_round_down: Stat::Unavailable,
            nb_entries: Stat::Unavailable,
        }
    }
}

pub fn averages(stats: Option<&AggregateStats>, bet_amount: f64) -> Averages {
    let Some(s) = stats else {
        return Averages::unavailable();
    };

    let avg_safe = Stat::ratio(s.safe_total_payout, s.safe_wins);
    let avg_risky = Stat::ratio(s.risky_total_payout, s.risky_wins);
    let safe_percent_wr = Stat::ratio(s.safe_wins as f64 * 100.0, s.nb_entries);
    let risky_percent_wr = Stat::ratio(s.risky_wins as f64 * 100.0, s.nb_entries);

    Averages {
        avg_payout: Stat::ratio(s.total_payout, s.nb_entries),
        avg_pool: Stat::ratio(s.total_pool, s.nb_entries),
        avg_diff_up: Stat::ratio(s.total_diff_up, s.nb_round_up),
        avg_diff_down: Stat::ratio(s.total_diff_down, s.nb_round_down),
        expected_safe: bucket_expectation(safe_percent_wr, avg_safe, bet_amount),
        expected_risky: bucket_expectation(risky_percent_wr, avg_risky, bet_amount),
        avg_safe,
        avg_risky,
        safe_percent_wr,
        risky_percent_wr,
        nb_round_up: Stat::Available(s.nb_round_up),
        nb_round_down: Stat::Available(s.nb_round_down),
        nb_entries: Stat::Available(s.nb_entries),
    }
}

fn bucket_expectation(win_rate: Stat, avg_payout: Stat, bet_amount: f64) -> Stat {
    match (win_rate, avg_payout) {
        (Stat::Available(p), Stat::Available(win)) => {
            Stat::Available(expected_value(p, bet_amount, win))
        }
        _ => Stat::Unavailable,
    }
}
