//! Clock abstraction and calendar helpers.

use chrono::{DateTime, Duration, NaiveTime, Utc};

/// Abstraction over system time so quota windows and job timings are testable.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Returns the half-open UTC calendar day `[00:00, +24h)` containing `at`.
#[must_use]
pub fn utc_day_window(at: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = at.date_naive().and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::hours(24))
}

/// Milliseconds elapsed between two instants, clamped at zero.
#[must_use]
pub fn elapsed_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_milliseconds().max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_utc_day_window_starts_at_midnight() {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 17, 45, 12).unwrap();

        let (start, end) = utc_day_window(at);

        assert_eq!(start, Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_elapsed_ms_never_negative() {
        let later = Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 1).unwrap();
        let earlier = Utc.with_ymd_and_hms(2026, 3, 9, 0, 0, 0).unwrap();

        assert_eq!(elapsed_ms(earlier, later), 1000);
        assert_eq!(elapsed_ms(later, earlier), 0);
    }
}
