//! crates/hostline_core/src/billing.rs
//!
//! Pure billing and calendar arithmetic. All money math is integer-only:
//! partial minutes bill up, the host's revenue share floors down, and the
//! platform absorbs the rounding remainder.

use chrono::{Datelike, NaiveDate};

/// Host share of call revenue, in percent. The remaining 30% is the platform's.
pub const HOST_SHARE_PERCENT: i64 = 70;

/// Billable minutes for a call: partial minutes round up, so a 61-second call
/// bills 2 minutes. A zero-second call bills nothing.
pub fn billed_minutes(duration_seconds: i64) -> i64 {
    if duration_seconds <= 0 {
        return 0;
    }
    (duration_seconds + 59) / 60
}

/// Total coins spent for a call of the given duration at the given rate.
pub fn coins_spent(duration_seconds: i64, rate_per_minute: i64) -> i64 {
    billed_minutes(duration_seconds) * rate_per_minute
}

/// The host's cut of `coins`: `floor(coins * share / 100)`.
pub fn host_earnings(coins: i64, share_percent: i64) -> i64 {
    coins * share_percent / 100
}

/// Folds one new rating into a running average, rounded to one decimal:
/// `(old_avg * old_count + rating) / (old_count + 1)`.
pub fn merge_rating(old_avg: f64, old_count: i64, rating: i32) -> f64 {
    let merged = (old_avg * old_count as f64 + f64::from(rating)) / (old_count as f64 + 1.0);
    (merged * 10.0).round() / 10.0
}

/// The Monday of the ISO week containing `date`. Used as the leaderboard week
/// key and as the start of a free-target week.
pub fn week_start(date: NaiveDate) -> NaiveDate {
    date - chrono::Duration::days(date.weekday().num_days_from_monday() as i64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_minutes_bill_up() {
        assert_eq!(billed_minutes(0), 0);
        assert_eq!(billed_minutes(1), 1);
        assert_eq!(billed_minutes(59), 1);
        assert_eq!(billed_minutes(60), 1);
        assert_eq!(billed_minutes(61), 2);
        assert_eq!(billed_minutes(120), 2);
    }

    #[test]
    fn sixty_one_seconds_at_fifty_bills_two_minutes() {
        assert_eq!(coins_spent(61, 50), 100);
    }

    #[test]
    fn host_share_floors_down() {
        assert_eq!(host_earnings(100, HOST_SHARE_PERCENT), 70);
        // floor(70.7) = 70; the platform keeps the remainder.
        assert_eq!(host_earnings(101, HOST_SHARE_PERCENT), 70);
        assert_eq!(host_earnings(0, HOST_SHARE_PERCENT), 0);
    }

    #[test]
    fn rating_average_merges_to_one_decimal() {
        assert_eq!(merge_rating(4.0, 1, 5), 4.5);
        assert_eq!(merge_rating(0.0, 0, 4), 4.0);
        // (4.5 * 2 + 3) / 3 = 4.0
        assert_eq!(merge_rating(4.5, 2, 3), 4.0);
        // (4.0 * 2 + 5) / 3 = 4.333... -> 4.3
        assert_eq!(merge_rating(4.0, 2, 5), 4.3);
    }

    #[test]
    fn week_start_is_always_monday() {
        // 2024-06-12 is a Wednesday; its week starts Monday 2024-06-10.
        let wed = NaiveDate::from_ymd_opt(2024, 6, 12).unwrap();
        assert_eq!(week_start(wed), NaiveDate::from_ymd_opt(2024, 6, 10).unwrap());
        // A Monday maps to itself, a Sunday to the previous Monday.
        let mon = NaiveDate::from_ymd_opt(2024, 6, 10).unwrap();
        assert_eq!(week_start(mon), mon);
        let sun = NaiveDate::from_ymd_opt(2024, 6, 16).unwrap();
        assert_eq!(week_start(sun), mon);
    }
}
