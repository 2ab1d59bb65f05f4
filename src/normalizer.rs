//! Turns scraped round cards into typed snapshots.
//!
//! Stateless. A snapshot either normalizes completely or the poll cycle that
//! produced it is skipped; nothing is partially applied.

use crate::error::{AppError, Result};
use crate::types::{Direction, PollContext, RawSnapshot, RiskBucket, Slot, Snapshot};

/// Normalize one raw card. `slot` decides which fields are mandatory: a live
/// (or closing) card must carry a price delta, a next card need not.
pub fn normalize(raw: &RawSnapshot, slot: Slot, ctx: &PollContext) -> Result<Snapshot> {
    let round_id = required(slot, "roundId", raw.round_id.as_deref(), parse_round_id)?;
    let pool_value = required(slot, "poolValue", raw.pool_value.as_deref(), parse_amount)?;
    let payout_up = required(slot, "payoutUP", raw.payout_up.as_deref(), parse_payout)?;
    let payout_down = required(slot, "payoutDOWN", raw.payout_down.as_deref(), parse_payout)?;

    let price_diff = match slot {
        Slot::Live => Some(required(slot, "priceDiff", raw.price_diff.as_deref(), parse_price_diff)?),
        Slot::Next => raw.price_diff.as_deref().and_then(parse_price_diff),
    };

    // Before the reveal the card shows a placeholder; that is simply "no oracle yet".
    let oracle_price = raw.oracle_price.as_deref().and_then(parse_amount);

    Ok(Snapshot {
        round_id,
        pool_value,
        payout_up,
        payout_down,
        price_diff,
        oracle_price,
        timestamp: ctx.captured_at,
        time_left: ctx.time_left.clone(),
        seconds_since_candle_open: ctx.seconds_since_candle_open,
        external_prices: ctx.external_prices.clone(),
    })
}

fn required<T>(
    slot: Slot,
    field: &str,
    value: Option<&str>,
    parse: impl Fn(&str) -> Option<T>,
) -> Result<T> {
    let Some(text) = value else {
        return Err(AppError::MalformedSnapshot(format!("{slot} card: missing {field}")));
    };
    parse(text).ok_or_else(|| {
        AppError::MalformedSnapshot(format!("{slot} card: {field} is not numeric ({text:?})"))
    })
}

/// `"#123456"` or `"123456"`.
pub fn parse_round_id(s: &str) -> Option<u64> {
    s.trim().trim_start_matches('#').trim().parse().ok()
}

/// Signed price delta. A minus sign before the digits, or a DOWN marker,
/// makes the value negative: `"-$1.23"`, `"$-1.23"`, `"DOWN 1.23"` → -1.23.
pub fn parse_price_diff(s: &str) -> Option<f64> {
    let (negative, magnitude) = numeric_part(s)?;
    let down_marker = s.to_ascii_uppercase().contains("DOWN");
    Some(if negative || down_marker { -magnitude } else { magnitude })
}

/// Payout multiple such as `"1.85x"`. Multiples are never negative.
pub fn parse_payout(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    let trimmed = trimmed
        .strip_suffix('x')
        .or_else(|| trimmed.strip_suffix('X'))
        .unwrap_or(trimmed);
    match numeric_part(trimmed)? {
        (false, v) => Some(v),
        (true, _) => None,
    }
}

/// Pool sizes and prices: `"$312.456"`, `"1,204.33 BNB"`.
pub fn parse_amount(s: &str) -> Option<f64> {
    let (negative, magnitude) = numeric_part(s)?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Splits a scraped number into (sign, magnitude). Currency symbols, unit
/// text and thousands separators are ignored; a `-` or `−` before the first
/// digit is the sign. Text holding a second number is rejected.
fn numeric_part(s: &str) -> Option<(bool, f64)> {
    let first_digit = s.find(|c: char| c.is_ascii_digit())?;
    let negative = s[..first_digit].contains(|c: char| c == '-' || c == '−');
    let rest = &s[first_digit..];
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(rest.len());
    let (number, tail) = rest.split_at(end);
    if tail.contains(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let digits: String = number.chars().filter(|c| *c != ',').collect();
    let value: f64 = digits.parse().ok()?;
    value.is_finite().then_some((negative, value))
}

/// Payout of the side that won: UP when the delta is positive, else DOWN.
pub fn winning_payout(price_diff: f64, payout_up: f64, payout_down: f64) -> f64 {
    match Direction::from_diff(price_diff) {
        Direction::Up => payout_up,
        Direction::Down => payout_down,
    }
}

/// The side with the strictly higher multiple is the underdog (`Risky`).
/// Equal multiples count as `Safe`.
pub fn risk_bucket(winner: Direction, payout_up: f64, payout_down: f64) -> RiskBucket {
    let (won, lost) = match winner {
        Direction::Up => (payout_up, payout_down),
        Direction::Down => (payout_down, payout_up),
    };
    if won > lost {
        RiskBucket::Risky
    } else {
        RiskBucket::Safe
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(id: &str, diff: Option<&str>) -> RawSnapshot {
        RawSnapshot {
            round_id: Some(id.to_string()),
            pool_value: Some("12.345 BNB".to_string()),
            payout_up: Some("1.80x".to_string()),
            payout_down: Some("2.20x".to_string()),
            price_diff: diff.map(str::to_string),
            oracle_price: None,
        }
    }

    fn ctx() -> PollContext {
        PollContext { captured_at: 1_000, ..PollContext::default() }
    }

    #[test]
    fn price_diff_sign_follows_marker() {
        assert_eq!(parse_price_diff("$1.234"), Some(1.234));
        assert_eq!(parse_price_diff("-$1.234"), Some(-1.234));
        assert_eq!(parse_price_diff("$-0.5"), Some(-0.5));
        assert_eq!(parse_price_diff("−0.5"), Some(-0.5));
        assert_eq!(parse_price_diff("DOWN 2.1"), Some(-2.1));
        assert_eq!(parse_price_diff("+$3"), Some(3.0));
        assert_eq!(parse_price_diff("n/a"), None);
    }

    #[test]
    fn payout_strips_suffix() {
        assert_eq!(parse_payout("1.85x"), Some(1.85));
        assert_eq!(parse_payout(" 2.01X "), Some(2.01));
        assert_eq!(parse_payout("x"), None);
    }

    #[test]
    fn amount_ignores_units_and_separators() {
        assert_eq!(parse_amount("1,204.33 BNB"), Some(1204.33));
        assert_eq!(parse_amount("$312.456"), Some(312.456));
        assert_eq!(parse_round_id("#90210"), Some(90210));
    }

    #[test]
    fn digits_after_unit_text_are_rejected() {
        assert_eq!(parse_amount("12 BNB 3"), None);
        assert_eq!(parse_price_diff("$1.2 / 3"), None);
        assert_eq!(parse_amount("12 BNB"), Some(12.0));
    }

    #[test]
    fn live_card_requires_price_diff() {
        let err = normalize(&raw("#10", None), Slot::Live, &ctx()).unwrap_err();
        assert!(matches!(err, AppError::MalformedSnapshot(_)));

        let next = normalize(&raw("#11", None), Slot::Next, &ctx()).unwrap();
        assert_eq!(next.round_id, 11);
        assert_eq!(next.price_diff, None);
        assert_eq!(next.pool_value, 12.345);
        assert_eq!(next.timestamp, 1_000);
    }

    #[test]
    fn non_numeric_pool_is_malformed() {
        let mut r = raw("#10", Some("$1"));
        r.pool_value = Some("loading".to_string());
        assert!(matches!(
            normalize(&r, Slot::Live, &ctx()),
            Err(AppError::MalformedSnapshot(_))
        ));
    }

    #[test]
    fn oracle_placeholder_is_not_revealed() {
        let mut r = raw("#10", Some("$1"));
        r.oracle_price = Some("--".to_string());
        assert_eq!(normalize(&r, Slot::Live, &ctx()).unwrap().oracle_price, None);
        r.oracle_price = Some("$301.5".to_string());
        assert_eq!(normalize(&r, Slot::Live, &ctx()).unwrap().oracle_price, Some(301.5));
    }

    #[test]
    fn favorite_winning_is_safe() {
        // UP pays 1.8, DOWN pays 2.2: UP is the favorite.
        assert_eq!(risk_bucket(Direction::Up, 1.8, 2.2), RiskBucket::Safe);
        assert_eq!(risk_bucket(Direction::Down, 1.8, 2.2), RiskBucket::Risky);
        assert_eq!(risk_bucket(Direction::Down, 2.0, 2.0), RiskBucket::Safe);
    }

    #[test]
    fn winning_payout_follows_delta_sign() {
        assert_eq!(winning_payout(0.4, 1.8, 2.2), 1.8);
        assert_eq!(winning_payout(0.0, 1.8, 2.2), 2.2);
        assert_eq!(winning_payout(-0.4, 1.8, 2.2), 2.2);
    }
}
