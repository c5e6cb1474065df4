use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Utc};

/// Round a decimal value to `scale` places using round-half-even (banker's
/// rounding), the tie-breaking rule used throughout the enrichment pipeline
/// for `total_hours` and `attendance_rate` so repeated aggregation does not
/// accumulate a directional bias. Decimal arithmetic throughout, never
/// floating-point, for the same reason.
pub fn round_half_even(value: &BigDecimal, scale: i64) -> BigDecimal {
    value.with_scale_round(scale, RoundingMode::HalfEven)
}

/// `total_hours = max(0, last_out - first_in) / 3600`, rounded half-even to
/// 2 decimals; `0` if either side is missing.
pub fn total_hours(first_in: Option<DateTime<Utc>>, last_out: Option<DateTime<Utc>>) -> BigDecimal {
    let (Some(first_in), Some(last_out)) = (first_in, last_out) else {
        return BigDecimal::from(0);
    };
    let seconds = (last_out - first_in).num_seconds().max(0);
    let hours = BigDecimal::from(seconds) / BigDecimal::from(3600);
    round_half_even(&hours, 2)
}

/// `attendance_rate = present / total_users`, rounded half-even to 4
/// decimals. `0` when there are no users to report on, rather than
/// dividing by zero.
pub fn attendance_rate(present: u32, total_users: u32) -> BigDecimal {
    if total_users == 0 {
        return BigDecimal::from(0);
    }
    let ratio = BigDecimal::from(present) / BigDecimal::from(total_users);
    round_half_even(&ratio, 4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 6, hour, minute, 0).unwrap()
    }

    #[test]
    fn computes_hours_between_in_and_out() {
        let hours = total_hours(Some(at(8, 5)), Some(at(17, 10)));
        assert_eq!(hours.to_string(), "9.08");
    }

    #[test]
    fn zero_when_either_side_missing() {
        assert_eq!(total_hours(Some(at(8, 0)), None).to_string(), "0");
        assert_eq!(total_hours(None, Some(at(17, 0))).to_string(), "0");
        assert_eq!(total_hours(None, None).to_string(), "0");
    }

    #[test]
    fn clamps_negative_spans_to_zero() {
        let hours = total_hours(Some(at(17, 0)), Some(at(8, 0)));
        assert_eq!(hours.to_string(), "0.00");
    }

    #[test]
    fn half_even_rounds_ties_to_even_digit() {
        let value = BigDecimal::from(125) / BigDecimal::from(10000); // 0.0125
        assert_eq!(round_half_even(&value, 3).to_string(), "0.012");
    }

    #[test]
    fn attendance_rate_divides_present_by_total() {
        assert_eq!(attendance_rate(3, 4).to_string(), "0.7500");
        assert_eq!(attendance_rate(0, 0).to_string(), "0");
    }
}
