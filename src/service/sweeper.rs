use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;
use futures_util::StreamExt;
use serde::Serialize;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{debug, error, info, instrument};
use utoipa::ToSchema;

use crate::error::AppResult;
use crate::model::attendance::{AttendanceRecord, AttendanceStatus, CheckStatus, RecordSource};
use crate::service::window::{ShiftWindow, local_date, resolve_window};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Nothing was punched: `ABSENT`, both sides `MISSED`.
    Absent,
    /// Checked in but never out: `NON_COMPLIANT`, check-out `MISSED`.
    MissedCheckOut,
}

impl SweepOutcome {
    pub fn status(self) -> AttendanceStatus {
        match self {
            SweepOutcome::Absent => AttendanceStatus::Absent,
            SweepOutcome::MissedCheckOut => AttendanceStatus::NonCompliant,
        }
    }
}

/// What the sweeper would do to a record right now, if anything.
///
/// Only `INCOMPLETE` records whose window has fully elapsed are touched, so a
/// finalized record is never revisited.
pub fn sweep_outcome(
    status: AttendanceStatus,
    check_in_at: Option<DateTime<Utc>>,
    check_out_at: Option<DateTime<Utc>>,
    window: &ShiftWindow,
    now: DateTime<Utc>,
) -> Option<SweepOutcome> {
    if status != AttendanceStatus::Incomplete || !window.has_elapsed(now) {
        return None;
    }
    match (check_in_at, check_out_at) {
        (None, None) => Some(SweepOutcome::Absent),
        (Some(_), None) => Some(SweepOutcome::MissedCheckOut),
        _ => None,
    }
}

/// Fills in `effective_status` of a record as the sweeper would leave it.
pub fn project(record: &mut AttendanceRecord, tz: Tz, now: DateTime<Utc>) {
    record.effective_status = record.status;
    if record.source == RecordSource::Manual {
        return;
    }
    let (Some(start), Some(end)) = (record.planned_start, record.planned_end) else {
        return;
    };
    let Ok(window) = resolve_window(record.date, start, end, tz) else {
        return;
    };
    if let Some(outcome) = sweep_outcome(
        record.status,
        record.check_in_at,
        record.check_out_at,
        &window,
        now,
    ) {
        record.effective_status = outcome.status();
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct SweepSummary {
    /// Incomplete records inspected.
    pub scanned: usize,
    pub absent: usize,
    pub missed_check_out: usize,
    pub failed: usize,
}

#[derive(Debug, sqlx::FromRow)]
struct SweepCandidate {
    id: u64,
    employee_id: u64,
    date: NaiveDate,
    check_in_at: Option<DateTime<Utc>>,
    check_out_at: Option<DateTime<Utc>>,
    planned_start: NaiveTime,
    planned_end: NaiveTime,
}

/// One sweeper pass over every `INCOMPLETE` device record dated today or earlier.
#[instrument(skip(pool))]
pub async fn sweep(
    pool: &MySqlPool,
    tz: Tz,
    batch_size: usize,
    now: DateTime<Utc>,
) -> AppResult<SweepSummary> {
    let batch_size = batch_size.max(1);
    let today = local_date(now, tz);
    let mut summary = SweepSummary::default();

    let mut stream = sqlx::query_as::<_, SweepCandidate>(
        r#"
        SELECT a.id, a.employee_id, a.date, a.check_in_at, a.check_out_at,
               p.planned_start, p.planned_end
        FROM attendance_records a
        JOIN planned_schedules p ON p.id = a.schedule_id
        WHERE a.status = ? AND a.source <> ? AND a.date <= ?
        ORDER BY a.id
        "#,
    )
    .bind(AttendanceStatus::Incomplete.as_str())
    .bind(RecordSource::Manual.as_str())
    .bind(today)
    .fetch(pool);

    let mut absent = Vec::with_capacity(batch_size);
    let mut missed = Vec::with_capacity(batch_size);

    while let Some(row) = stream.next().await {
        let candidate = row?;
        summary.scanned += 1;

        let window = match resolve_window(
            candidate.date,
            candidate.planned_start,
            candidate.planned_end,
            tz,
        ) {
            Ok(w) => w,
            Err(e) => {
                error!(employee_id = candidate.employee_id, date = %candidate.date, error = %e, "Cannot resolve shift window");
                summary.failed += 1;
                continue;
            }
        };

        match sweep_outcome(
            AttendanceStatus::Incomplete,
            candidate.check_in_at,
            candidate.check_out_at,
            &window,
            now,
        ) {
            Some(SweepOutcome::Absent) => absent.push(candidate.id),
            Some(SweepOutcome::MissedCheckOut) => missed.push(candidate.id),
            None => {}
        }

        if absent.len() >= batch_size {
            flush(pool, SweepOutcome::Absent, &mut absent, now, &mut summary).await;
        }
        if missed.len() >= batch_size {
            flush(pool, SweepOutcome::MissedCheckOut, &mut missed, now, &mut summary).await;
        }
    }
    drop(stream);

    flush(pool, SweepOutcome::Absent, &mut absent, now, &mut summary).await;
    flush(pool, SweepOutcome::MissedCheckOut, &mut missed, now, &mut summary).await;

    info!(?summary, "Sweep finished");
    Ok(summary)
}

async fn flush(
    pool: &MySqlPool,
    outcome: SweepOutcome,
    ids: &mut Vec<u64>,
    now: DateTime<Utc>,
    summary: &mut SweepSummary,
) {
    if ids.is_empty() {
        return;
    }
    match apply(pool, outcome, ids, now).await {
        Ok(updated) => {
            debug!(?outcome, updated, "Swept records");
            match outcome {
                SweepOutcome::Absent => summary.absent += updated,
                SweepOutcome::MissedCheckOut => summary.missed_check_out += updated,
            }
        }
        Err(e) => {
            error!(?outcome, size = ids.len(), error = %e, "Sweep batch failed");
            summary.failed += ids.len();
        }
    }
    ids.clear();
}

/// Guarded transition: rows that changed since they were read are left alone.
async fn apply(
    pool: &MySqlPool,
    outcome: SweepOutcome,
    ids: &[u64],
    now: DateTime<Utc>,
) -> AppResult<usize> {
    let mut qb = QueryBuilder::<MySql>::new("UPDATE attendance_records SET status = ");
    qb.push_bind(outcome.status().as_str());
    if outcome == SweepOutcome::Absent {
        qb.push(", check_in_status = ")
            .push_bind(CheckStatus::Missed.as_str());
    }
    qb.push(", check_out_status = ")
        .push_bind(CheckStatus::Missed.as_str())
        .push(", updated_at = ")
        .push_bind(now)
        .push(" WHERE status = ")
        .push_bind(AttendanceStatus::Incomplete.as_str())
        .push(" AND source <> ")
        .push_bind(RecordSource::Manual.as_str())
        .push(" AND check_out_at IS NULL");
    match outcome {
        SweepOutcome::Absent => qb.push(" AND check_in_at IS NULL"),
        SweepOutcome::MissedCheckOut => qb.push(" AND check_in_at IS NOT NULL"),
    };
    qb.push(" AND id IN (");
    let mut list = qb.separated(", ");
    for id in ids {
        list.push_bind(*id);
    }
    list.push_unseparated(")");

    let result = qb.build().execute(pool).await?;
    Ok(result.rows_affected() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::classify::{ShiftPolicy, classify_pair};
    use chrono::{TimeZone, Utc};
    use chrono_tz::Asia;

    const TZ: Tz = Asia::Ho_Chi_Minh;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap()
    }

    fn local(h: u32, m: u32) -> DateTime<Utc> {
        TZ.with_ymd_and_hms(2026, 3, 2, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn window() -> ShiftWindow {
        resolve_window(date(), t(8, 0), t(17, 0), TZ).unwrap()
    }

    fn record(check_in_at: Option<DateTime<Utc>>) -> AttendanceRecord {
        AttendanceRecord {
            id: 1,
            employee_id: 7,
            date: date(),
            schedule_id: Some(3),
            check_in_at,
            check_out_at: None,
            check_in_status: CheckStatus::Pending,
            check_out_status: CheckStatus::Pending,
            status: AttendanceStatus::Incomplete,
            effective_status: AttendanceStatus::Incomplete,
            late_minutes: 0,
            early_leave_minutes: 0,
            overtime_minutes: 0,
            work_minutes: 0,
            source: RecordSource::Device,
            note: None,
            updated_at: local(7, 0),
            planned_name: Some("Day".into()),
            planned_start: Some(t(8, 0)),
            planned_end: Some(t(17, 0)),
        }
    }

    #[test]
    fn shift_in_progress_is_left_alone() {
        let outcome = sweep_outcome(AttendanceStatus::Incomplete, None, None, &window(), local(16, 59));
        assert_eq!(outcome, None);
    }

    #[test]
    fn elapsed_shift_without_punches_becomes_absent() {
        let outcome = sweep_outcome(AttendanceStatus::Incomplete, None, None, &window(), local(17, 1));
        assert_eq!(outcome, Some(SweepOutcome::Absent));
        assert_eq!(outcome.unwrap().status(), AttendanceStatus::Absent);
    }

    #[test]
    fn elapsed_shift_with_check_in_only_misses_check_out() {
        let outcome = sweep_outcome(
            AttendanceStatus::Incomplete,
            Some(local(8, 20)),
            None,
            &window(),
            local(18, 0),
        );
        assert_eq!(outcome, Some(SweepOutcome::MissedCheckOut));
    }

    #[test]
    fn sweeping_twice_is_a_no_op() {
        let now = local(23, 0);
        let first = sweep_outcome(AttendanceStatus::Incomplete, None, None, &window(), now).unwrap();
        let second = sweep_outcome(first.status(), None, None, &window(), now);
        assert_eq!(second, None);
    }

    #[test]
    fn sweeper_agrees_with_classification_after_window() {
        let now = local(20, 0);
        let policy = ShiftPolicy {
            late_grace_minutes: 15,
            ..Default::default()
        };
        for check_in in [None, Some(local(8, 20))] {
            let classified = classify_pair(&window(), &policy, check_in, None, now);
            let swept = sweep_outcome(AttendanceStatus::Incomplete, check_in, None, &window(), now).unwrap();
            assert_eq!(classified.status, swept.status());
            assert_eq!(classified.check_out_status, CheckStatus::Missed);
        }
    }

    #[test]
    fn projection_reports_effective_status_without_touching_stored_one() {
        let mut r = record(None);
        project(&mut r, TZ, local(18, 0));
        assert_eq!(r.status, AttendanceStatus::Incomplete);
        assert_eq!(r.effective_status, AttendanceStatus::Absent);

        let mut early = record(Some(local(8, 5)));
        project(&mut early, TZ, local(12, 0));
        assert_eq!(early.effective_status, AttendanceStatus::Incomplete);
    }

    #[test]
    fn projection_ignores_manual_and_unplanned_records() {
        let mut manual = record(None);
        manual.source = RecordSource::Manual;
        project(&mut manual, TZ, local(23, 0));
        assert_eq!(manual.effective_status, AttendanceStatus::Incomplete);

        let mut unplanned = record(None);
        unplanned.planned_start = None;
        project(&mut unplanned, TZ, local(23, 0));
        assert_eq!(unplanned.effective_status, AttendanceStatus::Incomplete);
    }
}
