use chrono::{DateTime, Utc};

use crate::model::attendance::{AttendanceStatus, CheckStatus};
use crate::service::window::{MatchTolerance, ShiftWindow};

/// Grace and threshold values copied from the planned shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShiftPolicy {
    pub break_minutes: i64,
    pub late_grace_minutes: i64,
    pub early_grace_minutes: i64,
    pub overtime_threshold_minutes: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub check_in_at: Option<DateTime<Utc>>,
    pub check_out_at: Option<DateTime<Utc>>,
    pub check_in_status: CheckStatus,
    pub check_out_status: CheckStatus,
    pub status: AttendanceStatus,
    pub late_minutes: i64,
    pub early_leave_minutes: i64,
    pub overtime_minutes: i64,
    pub work_minutes: i64,
}

impl Classification {
    /// Stub written when a shift is assigned and nothing has been punched yet.
    pub fn pending() -> Self {
        Self {
            check_in_at: None,
            check_out_at: None,
            check_in_status: CheckStatus::Pending,
            check_out_status: CheckStatus::Pending,
            status: AttendanceStatus::Incomplete,
            late_minutes: 0,
            early_leave_minutes: 0,
            overtime_minutes: 0,
            work_minutes: 0,
        }
    }
}

/// Earliest punch is the check-in, latest is the check-out.
///
/// Punches within `tolerance.duplicate_punch` of the check-in are folded into it,
/// so a double tap does not produce a check-out. Middle punches are ignored.
pub fn pick_in_out(
    punches: &[DateTime<Utc>],
    tolerance: &MatchTolerance,
) -> (Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
    let Some(check_in) = punches.iter().copied().min() else {
        return (None, None);
    };

    let check_out = punches
        .iter()
        .copied()
        .filter(|p| *p - check_in > tolerance.duplicate_punch)
        .max();

    (Some(check_in), check_out)
}

pub fn classify(
    window: &ShiftWindow,
    policy: &ShiftPolicy,
    tolerance: &MatchTolerance,
    punches: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> Classification {
    let (check_in, check_out) = pick_in_out(punches, tolerance);
    classify_pair(window, policy, check_in, check_out, now)
}

/// Classifies explicit check-in/out instants. Used directly by manual overrides.
pub fn classify_pair(
    window: &ShiftWindow,
    policy: &ShiftPolicy,
    check_in: Option<DateTime<Utc>>,
    check_out: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Classification {
    let elapsed = window.has_elapsed(now);
    let missing = if elapsed {
        CheckStatus::Missed
    } else {
        CheckStatus::Pending
    };

    let late_minutes = check_in
        .map(|at| ((at - window.start).num_minutes() - policy.late_grace_minutes).max(0))
        .unwrap_or(0);
    let early_leave_minutes = check_out
        .map(|at| ((window.end - at).num_minutes() - policy.early_grace_minutes).max(0))
        .unwrap_or(0);
    let overtime_minutes = check_out
        .map(|at| ((at - window.end).num_minutes() - policy.overtime_threshold_minutes).max(0))
        .unwrap_or(0);
    let work_minutes = match (check_in, check_out) {
        (Some(i), Some(o)) => ((o - i).num_minutes() - policy.break_minutes).max(0),
        _ => 0,
    };

    let check_in_status = match check_in {
        Some(_) if late_minutes > 0 => CheckStatus::Late,
        Some(_) => CheckStatus::OnTime,
        None => missing,
    };
    let check_out_status = match check_out {
        Some(_) if early_leave_minutes > 0 => CheckStatus::Early,
        Some(_) => CheckStatus::OnTime,
        None => missing,
    };

    let status = match (check_in, check_out) {
        (None, None) if elapsed => AttendanceStatus::Absent,
        (None, None) => AttendanceStatus::Incomplete,
        (None, Some(_)) => AttendanceStatus::NonCompliant,
        (Some(_), None) if elapsed => AttendanceStatus::NonCompliant,
        (Some(_), None) => AttendanceStatus::Incomplete,
        (Some(i), Some(o)) if o < i => AttendanceStatus::NonCompliant,
        (Some(_), Some(_)) => match (late_minutes > 0, early_leave_minutes > 0) {
            (true, true) => AttendanceStatus::LateAndEarly,
            (true, false) => AttendanceStatus::Late,
            (false, true) => AttendanceStatus::EarlyLeave,
            (false, false) if overtime_minutes > 0 => AttendanceStatus::Overtime,
            (false, false) => AttendanceStatus::Present,
        },
    };

    Classification {
        check_in_at: check_in,
        check_out_at: check_out,
        check_in_status,
        check_out_status,
        status,
        late_minutes,
        early_leave_minutes,
        overtime_minutes,
        work_minutes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::window::resolve_window;
    use chrono::{Duration, NaiveDate, NaiveTime, TimeZone};
    use chrono_tz::{Asia, Tz};

    const TZ: Tz = Asia::Ho_Chi_Minh;

    fn tolerance() -> MatchTolerance {
        MatchTolerance {
            checkin_lead: Duration::minutes(120),
            checkout_trail: Duration::minutes(240),
            duplicate_punch: Duration::seconds(60),
        }
    }

    fn policy(late_grace: i64) -> ShiftPolicy {
        ShiftPolicy {
            break_minutes: 60,
            late_grace_minutes: late_grace,
            early_grace_minutes: 5,
            overtime_threshold_minutes: 0,
        }
    }

    fn day_shift() -> ShiftWindow {
        resolve_window(
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(17, 0, 0).unwrap(),
            TZ,
        )
        .unwrap()
    }

    /// Local wall-clock instant in the business timezone.
    fn local(day: u32, h: u32, m: u32) -> DateTime<Utc> {
        TZ.with_ymd_and_hms(2026, 3, day, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn single_late_punch_stays_incomplete_until_window_ends() {
        let w = day_shift();
        let punches = [local(2, 8, 20)];

        let during = classify(&w, &policy(15), &tolerance(), &punches, local(2, 12, 0));
        assert_eq!(during.check_in_at, Some(local(2, 8, 20)));
        assert_eq!(during.check_in_status, CheckStatus::Late);
        assert_eq!(during.late_minutes, 5);
        assert_eq!(during.check_out_at, None);
        assert_eq!(during.check_out_status, CheckStatus::Pending);
        assert_eq!(during.status, AttendanceStatus::Incomplete);

        let after = classify(&w, &policy(15), &tolerance(), &punches, local(2, 17, 1));
        assert_eq!(after.check_out_status, CheckStatus::Missed);
        assert_eq!(after.status, AttendanceStatus::NonCompliant);
        assert_eq!(after.late_minutes, 5);
    }

    #[test]
    fn earliest_and_latest_win_regardless_of_order() {
        let w = day_shift();
        let (t1, t2, t3) = (local(2, 7, 55), local(2, 12, 30), local(2, 17, 2));
        let now = local(3, 0, 0);

        let sorted = classify(&w, &policy(15), &tolerance(), &[t1, t2, t3], now);
        let shuffled = classify(&w, &policy(15), &tolerance(), &[t3, t1, t2], now);
        let reversed = classify(&w, &policy(15), &tolerance(), &[t3, t2, t1], now);

        assert_eq!(sorted.check_in_at, Some(t1));
        assert_eq!(sorted.check_out_at, Some(t3));
        assert_eq!(sorted, shuffled);
        assert_eq!(sorted, reversed);
        assert_eq!(sorted.status, AttendanceStatus::Overtime);
        assert_eq!(sorted.overtime_minutes, 2);
        // 9h07m on site minus the 60 minute break
        assert_eq!(sorted.work_minutes, 487);
    }

    #[test]
    fn late_and_early_combinations() {
        let w = day_shift();
        let now = local(3, 0, 0);
        let p = policy(10);
        let tol = tolerance();

        let late = classify(&w, &p, &tol, &[local(2, 8, 30), local(2, 17, 0)], now);
        assert_eq!(late.status, AttendanceStatus::Late);
        assert_eq!(late.late_minutes, 20);
        assert_eq!(late.check_out_status, CheckStatus::OnTime);

        let early = classify(&w, &p, &tol, &[local(2, 8, 0), local(2, 16, 30)], now);
        assert_eq!(early.status, AttendanceStatus::EarlyLeave);
        assert_eq!(early.early_leave_minutes, 25);
        assert_eq!(early.check_out_status, CheckStatus::Early);

        let both = classify(&w, &p, &tol, &[local(2, 9, 0), local(2, 16, 0)], now);
        assert_eq!(both.status, AttendanceStatus::LateAndEarly);

        let fine = classify(&w, &p, &tol, &[local(2, 8, 9), local(2, 16, 56)], now);
        assert_eq!(fine.status, AttendanceStatus::Present);
        assert_eq!(fine.check_in_status, CheckStatus::OnTime);
        assert_eq!(fine.late_minutes, 0);
        assert_eq!(fine.early_leave_minutes, 0);
    }

    #[test]
    fn overnight_shift_from_scenario() {
        let w = resolve_window(
            NaiveDate::from_ymd_opt(2026, 3, 2).unwrap(),
            NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(6, 0, 0).unwrap(),
            TZ,
        )
        .unwrap();
        let p = ShiftPolicy {
            break_minutes: 0,
            late_grace_minutes: 5,
            early_grace_minutes: 5,
            overtime_threshold_minutes: 0,
        };

        let c = classify(
            &w,
            &p,
            &tolerance(),
            &[local(3, 6, 5), local(2, 21, 58)],
            local(3, 9, 0),
        );
        assert_eq!(c.check_in_at, Some(local(2, 21, 58)));
        assert_eq!(c.check_in_status, CheckStatus::OnTime);
        assert_eq!(c.check_out_at, Some(local(3, 6, 5)));
        assert_eq!(c.overtime_minutes, 5);
        assert_eq!(c.status, AttendanceStatus::Overtime);
        assert_eq!(c.work_minutes, 8 * 60 + 7);
    }

    #[test]
    fn overtime_threshold_is_subtracted() {
        let w = day_shift();
        let p = ShiftPolicy {
            overtime_threshold_minutes: 30,
            ..policy(0)
        };
        let short = classify(&w, &p, &tolerance(), &[local(2, 8, 0), local(2, 17, 20)], local(3, 0, 0));
        assert_eq!(short.overtime_minutes, 0);
        assert_eq!(short.status, AttendanceStatus::Present);

        let long = classify(&w, &p, &tolerance(), &[local(2, 8, 0), local(2, 18, 15)], local(3, 0, 0));
        assert_eq!(long.overtime_minutes, 45);
        assert_eq!(long.status, AttendanceStatus::Overtime);
    }

    #[test]
    fn double_tap_is_not_a_checkout() {
        let w = day_shift();
        let first = local(2, 7, 58);
        let c = classify(
            &w,
            &policy(15),
            &tolerance(),
            &[first, first + Duration::seconds(4)],
            local(2, 9, 0),
        );
        assert_eq!(c.check_in_at, Some(first));
        assert_eq!(c.check_out_at, None);
        assert_eq!(c.status, AttendanceStatus::Incomplete);
    }

    #[test]
    fn no_punches_is_pending_then_absent() {
        let w = day_shift();
        let before = classify(&w, &policy(15), &tolerance(), &[], local(2, 16, 0));
        assert_eq!(before, Classification::pending());

        let after = classify(&w, &policy(15), &tolerance(), &[], local(2, 18, 0));
        assert_eq!(after.status, AttendanceStatus::Absent);
        assert_eq!(after.check_in_status, CheckStatus::Missed);
        assert_eq!(after.check_out_status, CheckStatus::Missed);
    }

    #[test]
    fn inverted_manual_pair_is_non_compliant() {
        let w = day_shift();
        let c = classify_pair(
            &w,
            &policy(15),
            Some(local(2, 17, 0)),
            Some(local(2, 8, 0)),
            local(3, 0, 0),
        );
        assert_eq!(c.status, AttendanceStatus::NonCompliant);
        assert_eq!(c.work_minutes, 0);

        let out_only = classify_pair(&w, &policy(15), None, Some(local(2, 17, 0)), local(3, 0, 0));
        assert_eq!(out_only.status, AttendanceStatus::NonCompliant);
        assert_eq!(out_only.check_in_status, CheckStatus::Missed);
    }
}
