use bigdecimal::BigDecimal;
use chrono::{TimeZone, Utc};
use common_hours::{attendance_rate, round_half_even, total_hours};
use proptest::prelude::*;
use std::str::FromStr;

proptest! {
    /// Rounding to a given scale never moves a value by more than half a
    /// unit of that scale, in either direction.
    #[test]
    fn round_half_even_stays_within_half_unit(cents in -1_000_000i64..1_000_000) {
        let value = BigDecimal::from(cents) / BigDecimal::from(100);
        let rounded = round_half_even(&value, 1);
        let diff = &rounded - &value;
        let half_unit = BigDecimal::from_str("0.05").unwrap();
        prop_assert!(diff <= half_unit && diff >= -half_unit);
    }

    /// Rounding is idempotent: rounding an already-rounded value changes
    /// nothing.
    #[test]
    fn round_half_even_is_idempotent(cents in -1_000_000i64..1_000_000) {
        let value = BigDecimal::from(cents) / BigDecimal::from(100);
        let once = round_half_even(&value, 2);
        let twice = round_half_even(&once, 2);
        prop_assert_eq!(once, twice);
    }

    /// `total_hours` is never negative regardless of punch order, and
    /// widening the window (pushing `last_out` later) never shrinks it.
    #[test]
    fn total_hours_is_nonnegative_and_monotonic(
        start_minute in 0i64..1440,
        span_minutes in 0i64..1440,
        extra_minutes in 0i64..1440,
    ) {
        let day = Utc.with_ymd_and_hms(2026, 1, 6, 0, 0, 0).unwrap();
        let first_in = day + chrono::Duration::minutes(start_minute);
        let last_out = first_in + chrono::Duration::minutes(span_minutes);
        let later_out = last_out + chrono::Duration::minutes(extra_minutes);

        let hours = total_hours(Some(first_in), Some(last_out));
        let wider_hours = total_hours(Some(first_in), Some(later_out));

        prop_assert!(hours >= BigDecimal::from(0));
        prop_assert!(wider_hours >= hours);
    }

    /// `attendance_rate` is a non-negative fraction, and never exceeds 1
    /// when `present` is a genuine subset of `total_users`; zero total
    /// users always yields zero rather than a division error.
    #[test]
    fn attendance_rate_is_bounded_fraction(total_users in 0u32..500, present_offset in 0u32..500) {
        let present = present_offset.min(total_users);
        let rate = attendance_rate(present, total_users);
        prop_assert!(rate >= BigDecimal::from(0));
        if total_users > 0 {
            prop_assert!(rate <= BigDecimal::from(1));
        } else {
            prop_assert_eq!(rate, BigDecimal::from(0));
        }
    }
}
