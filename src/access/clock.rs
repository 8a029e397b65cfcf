//! Business-month boundary math.
//!
//! The monthly view quota resets on calendar-month boundaries computed in the
//! configured business timezone, not UTC. All decomposition goes through a
//! real tz-aware conversion so the math stays correct in DST-observing zones.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use chrono_tz::Tz;

/// First day of the current month, as a date in the business timezone.
pub fn business_month_start(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    let local = now.with_timezone(&tz).date_naive();
    NaiveDate::from_ymd_opt(local.year(), local.month(), 1)
        .expect("first of an existing month is a valid date")
}

/// First day of the following month, in the business timezone.
pub fn next_month_reset_date(now: DateTime<Utc>, tz: Tz) -> NaiveDate {
    let start = business_month_start(now, tz);
    let (year, month) = if start.month() == 12 {
        (start.year() + 1, 1)
    } else {
        (start.year(), start.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .expect("first of the following month is a valid date")
}

/// Calendar days from zone-local "today" to the reset date, clamped at 0.
///
/// The clamp defends against clock skew and stale reset dates.
pub fn days_until_reset(reset_date: NaiveDate, now: DateTime<Utc>, tz: Tz) -> i64 {
    let today = now.with_timezone(&tz).date_naive();
    (reset_date - today).num_days().max(0)
}

/// `YYYY-MM-DD` key used in API payloads and the view ledger.
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use chrono_tz::Asia::Shanghai;
    use chrono_tz::America::New_York;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn test_month_start_follows_business_zone_not_utc() {
        // 2025-10-31 20:00 UTC is already 2025-11-01 04:00 in Shanghai.
        let now = utc(2025, 10, 31, 20, 0);
        let start = business_month_start(now, Shanghai);
        assert_eq!(date_key(start), "2025-11-01");

        // Same instant is still October in New York.
        let start = business_month_start(now, New_York);
        assert_eq!(date_key(start), "2025-10-01");
    }

    #[test]
    fn test_next_month_reset_year_rollover() {
        let now = utc(2025, 12, 15, 12, 0);
        let reset = next_month_reset_date(now, Shanghai);
        assert_eq!(date_key(reset), "2026-01-01");
    }

    #[test]
    fn test_next_month_reset_mid_year() {
        let now = utc(2025, 11, 4, 3, 0);
        assert_eq!(date_key(next_month_reset_date(now, Shanghai)), "2025-12-01");
    }

    #[test]
    fn test_days_until_reset_counts_calendar_days() {
        let now = utc(2025, 11, 28, 10, 0); // Shanghai local 2025-11-28
        let reset = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        assert_eq!(days_until_reset(reset, now, Shanghai), 3);
    }

    #[test]
    fn test_days_until_reset_clamps_negative() {
        let now = utc(2025, 11, 28, 10, 0);
        let stale_reset = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        assert_eq!(days_until_reset(stale_reset, now, Shanghai), 0);
    }

    #[test]
    fn test_days_until_reset_across_dst_transition() {
        // US DST ends 2025-11-02; the count must remain whole calendar days.
        let now = utc(2025, 10, 30, 12, 0);
        let reset = NaiveDate::from_ymd_opt(2025, 11, 1).unwrap();
        assert_eq!(days_until_reset(reset, now, New_York), 2);
    }
}
