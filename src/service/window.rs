use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::AppError;

/// How far around a shift a punch may fall and still belong to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchTolerance {
    pub checkin_lead: Duration,
    pub checkout_trail: Duration,
    /// Punches this close after the check-in are a double tap, not a check-out.
    pub duplicate_punch: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl ShiftWindow {
    /// Earliest and latest instants a punch can have and still be matched to this shift.
    pub fn capture(&self, tolerance: &MatchTolerance) -> (DateTime<Utc>, DateTime<Utc>) {
        (
            self.start - tolerance.checkin_lead,
            self.end + tolerance.checkout_trail,
        )
    }

    pub fn captures(&self, at: DateTime<Utc>, tolerance: &MatchTolerance) -> bool {
        let (from, to) = self.capture(tolerance);
        from <= at && at <= to
    }

    /// Zero inside `[start, end]`, otherwise the gap to the nearest edge.
    pub fn distance(&self, at: DateTime<Utc>) -> Duration {
        if at < self.start {
            self.start - at
        } else if at > self.end {
            at - self.end
        } else {
            Duration::zero()
        }
    }

    pub fn has_elapsed(&self, now: DateTime<Utc>) -> bool {
        now > self.end
    }
}

/// Maps a local wall-clock time to an instant.
///
/// Ambiguous times (DST fall-back) take the earlier instant; times inside a
/// spring-forward gap are pushed one hour later.
pub fn localize(tz: Tz, local: NaiveDateTime) -> Option<DateTime<Utc>> {
    tz.from_local_datetime(&local)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(local + Duration::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
}

/// Calendar date of an instant as seen in the business timezone.
pub fn local_date(at: DateTime<Utc>, tz: Tz) -> NaiveDate {
    at.with_timezone(&tz).date_naive()
}

/// Absolute window a shift occupies on `date`.
///
/// An end that is not after the start means the shift runs overnight, so the
/// end is taken on the following local day.
pub fn resolve_window(
    date: NaiveDate,
    start: NaiveTime,
    end: NaiveTime,
    tz: Tz,
) -> Result<ShiftWindow, AppError> {
    let unresolvable = || {
        AppError::validation(format!(
            "shift {start}-{end} cannot be placed on {date} in {}",
            tz.name()
        ))
    };

    let start_at = localize(tz, date.and_time(start)).ok_or_else(unresolvable)?;
    let mut end_at = localize(tz, date.and_time(end)).ok_or_else(unresolvable)?;

    if end_at <= start_at {
        // Next day's wall clock, not start + 24h: DST nights are 23 or 25 hours long.
        let next = date.succ_opt().ok_or_else(unresolvable)?;
        end_at = localize(tz, next.and_time(end)).ok_or_else(unresolvable)?;
    }

    Ok(ShiftWindow {
        start: start_at,
        end: end_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::{America, Asia, Europe};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn day_shift_is_converted_from_business_timezone() {
        let w = resolve_window(d(2026, 3, 2), t(8, 0), t(17, 0), Asia::Ho_Chi_Minh).unwrap();
        assert_eq!(w.start, Utc.with_ymd_and_hms(2026, 3, 2, 1, 0, 0).unwrap());
        assert_eq!(w.end, Utc.with_ymd_and_hms(2026, 3, 2, 10, 0, 0).unwrap());
    }

    #[test]
    fn overnight_shift_ends_next_local_day() {
        let tz = Asia::Ho_Chi_Minh;
        let mut date = d(2026, 1, 1);
        for _ in 0..400 {
            let w = resolve_window(date, t(22, 0), t(6, 0), tz).unwrap();
            assert!(w.end > w.start);
            let local_end = w.end.with_timezone(&tz);
            assert_eq!(local_end.date_naive(), date.succ_opt().unwrap());
            assert_eq!(local_end.time(), t(6, 0));
            date = date.succ_opt().unwrap();
        }
    }

    #[test]
    fn equal_start_and_end_is_a_full_day() {
        let w = resolve_window(d(2026, 5, 5), t(7, 0), t(7, 0), Tz::UTC).unwrap();
        assert_eq!(w.end - w.start, Duration::hours(24));
    }

    #[test]
    fn overnight_across_spring_forward_is_shorter() {
        // Europe/Berlin skips 02:00-03:00 on 2026-03-29.
        let w = resolve_window(d(2026, 3, 28), t(22, 0), t(6, 0), Europe::Berlin).unwrap();
        assert_eq!(w.end - w.start, Duration::hours(7));
    }

    #[test]
    fn start_inside_dst_gap_is_pushed_forward() {
        // 02:30 does not exist in New York on 2026-03-08.
        let w = resolve_window(d(2026, 3, 8), t(2, 30), t(10, 0), America::New_York).unwrap();
        assert_eq!(
            w.start.with_timezone(&America::New_York).time(),
            t(3, 30)
        );
    }

    #[test]
    fn local_date_differs_from_utc_date_near_midnight() {
        // 23:40 in Ho Chi Minh City is 16:40 UTC the same day; 00:30 local is 17:30 UTC the day before.
        let late = Utc.with_ymd_and_hms(2026, 3, 2, 16, 40, 0).unwrap();
        assert_eq!(local_date(late, Asia::Ho_Chi_Minh), d(2026, 3, 2));
        let after_midnight = Utc.with_ymd_and_hms(2026, 3, 2, 17, 30, 0).unwrap();
        assert_eq!(local_date(after_midnight, Asia::Ho_Chi_Minh), d(2026, 3, 3));
    }

    #[test]
    fn capture_and_distance() {
        let w = resolve_window(d(2026, 3, 2), t(8, 0), t(17, 0), Tz::UTC).unwrap();
        let tol = MatchTolerance {
            checkin_lead: Duration::minutes(60),
            checkout_trail: Duration::minutes(120),
            duplicate_punch: Duration::seconds(60),
        };
        let at = |h, m| Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap();

        assert!(w.captures(at(7, 0), &tol));
        assert!(!w.captures(at(6, 59), &tol));
        assert!(w.captures(at(19, 0), &tol));
        assert!(!w.captures(at(19, 1), &tol));
        assert_eq!(w.distance(at(12, 0)), Duration::zero());
        assert_eq!(w.distance(at(7, 30)), Duration::minutes(30));
        assert_eq!(w.distance(at(18, 0)), Duration::minutes(60));
    }
}
