use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::config::EngineSettings;
use crate::error::{AppError, AppResult};
use crate::model::attendance::{AttendanceRecord, AttendanceRow, RecordSource};
use crate::model::schedule::PlannedSchedule;
use crate::service::classify::classify_pair;
use crate::service::sweeper::project;
use crate::service::window::resolve_window;

const MAX_HISTORY_DAYS: i64 = 366;

const RECORD_COLUMNS: &str = "SELECT a.id, a.employee_id, a.date, a.schedule_id, a.check_in_at, a.check_out_at, \
     a.check_in_status, a.check_out_status, a.status, a.late_minutes, a.early_leave_minutes, \
     a.overtime_minutes, a.work_minutes, a.source, a.note, a.updated_at, \
     p.planned_name, p.planned_start, p.planned_end \
     FROM attendance_records a \
     LEFT JOIN planned_schedules p ON p.id = a.schedule_id";

#[derive(Debug, Deserialize, IntoParams)]
pub struct HistoryQuery {
    /// Ignored for employees, who always see their own records.
    pub employee_id: Option<u64>,
    #[param(value_type = String)]
    pub from: Option<NaiveDate>,
    #[param(value_type = String)]
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct OverrideRequest {
    #[schema(value_type = String, format = "date-time", nullable = true)]
    pub check_in_at: Option<DateTime<Utc>>,
    #[schema(value_type = String, format = "date-time", nullable = true)]
    pub check_out_at: Option<DateTime<Utc>>,
    #[schema(example = "Badge reader offline, confirmed by supervisor")]
    pub note: Option<String>,
}

/// First and last day of the month containing `today`.
pub fn month_bounds(today: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = today.with_day(1).unwrap_or(today);
    let next_month = if first.month() == 12 {
        NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
    };
    let last = next_month.map_or(today, |d| d - Duration::days(1));
    (first, last)
}

/// Resolves the requested range, defaulting to the current month.
pub fn history_range(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
) -> AppResult<(NaiveDate, NaiveDate)> {
    let (month_start, month_end) = month_bounds(today);
    let (from, to) = match (from, to) {
        (None, None) => (month_start, month_end),
        (Some(from), None) => (from, month_bounds(from).1),
        (None, Some(to)) => (month_bounds(to).0, to),
        (Some(from), Some(to)) => (from, to),
    };
    if from > to {
        return Err(AppError::validation("from must not be after to"));
    }
    if (to - from).num_days() >= MAX_HISTORY_DAYS {
        return Err(AppError::validation(format!(
            "a history query may cover at most {MAX_HISTORY_DAYS} days"
        )));
    }
    Ok((from, to))
}

fn to_records(rows: Vec<AttendanceRow>, tz: Tz, now: DateTime<Utc>) -> AppResult<Vec<AttendanceRecord>> {
    rows.into_iter()
        .map(|row| {
            let mut record = AttendanceRecord::try_from(row)?;
            project(&mut record, tz, now);
            Ok(record)
        })
        .collect()
}

/// Records in `[from, to]`, with elapsed incomplete days projected to their swept status.
#[instrument(skip(pool))]
pub async fn history(
    pool: &MySqlPool,
    tz: Tz,
    employee_id: Option<u64>,
    from: NaiveDate,
    to: NaiveDate,
    now: DateTime<Utc>,
) -> AppResult<Vec<AttendanceRecord>> {
    let mut qb = QueryBuilder::<MySql>::new(RECORD_COLUMNS);
    qb.push(" WHERE a.date BETWEEN ")
        .push_bind(from)
        .push(" AND ")
        .push_bind(to);
    if let Some(employee_id) = employee_id {
        qb.push(" AND a.employee_id = ").push_bind(employee_id);
    }
    qb.push(" ORDER BY a.date, a.employee_id");

    let rows = qb.build_query_as::<AttendanceRow>().fetch_all(pool).await?;
    to_records(rows, tz, now)
}

pub async fn get_record(pool: &MySqlPool, tz: Tz, id: u64, now: DateTime<Utc>) -> AppResult<AttendanceRecord> {
    let mut qb = QueryBuilder::<MySql>::new(RECORD_COLUMNS);
    qb.push(" WHERE a.id = ").push_bind(id);

    let row = qb
        .build_query_as::<AttendanceRow>()
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| AppError::not_found(format!("attendance record {id} does not exist")))?;

    let mut record = AttendanceRecord::try_from(row)?;
    project(&mut record, tz, now);
    Ok(record)
}

/// Sets the check instants by hand and reclassifies them against the planned shift.
///
/// The record becomes `MANUAL`, so later reconciliation and sweeps leave it as is.
#[instrument(skip(pool, settings, req))]
pub async fn override_record(
    pool: &MySqlPool,
    settings: &EngineSettings,
    id: u64,
    req: &OverrideRequest,
    now: DateTime<Utc>,
) -> AppResult<AttendanceRecord> {
    if let (Some(check_in), Some(check_out)) = (req.check_in_at, req.check_out_at) {
        if check_out < check_in {
            return Err(AppError::validation("check_out_at must not be before check_in_at"));
        }
    }
    let note = req
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let mut tx = pool.begin().await?;

    let schedule_id = sqlx::query_scalar::<_, Option<u64>>(
        "SELECT schedule_id FROM attendance_records WHERE id = ? FOR UPDATE",
    )
    .bind(id)
    .fetch_optional(&mut *tx)
    .await?
    .ok_or_else(|| AppError::not_found(format!("attendance record {id} does not exist")))?
    .ok_or_else(|| AppError::Conflict(format!("attendance record {id} has no planned shift")))?;

    let plan = sqlx::query_as::<_, PlannedSchedule>(
        r#"
        SELECT id, employee_id, date, shift_id, planned_name, planned_start, planned_end,
               planned_break_minutes, late_grace_minutes, early_grace_minutes,
               overtime_threshold_minutes
        FROM planned_schedules
        WHERE id = ?
        "#,
    )
    .bind(schedule_id)
    .fetch_one(&mut *tx)
    .await?;

    let window = resolve_window(plan.date, plan.planned_start, plan.planned_end, settings.timezone)?;
    let c = classify_pair(&window, &plan.policy(), req.check_in_at, req.check_out_at, now);

    sqlx::query(
        r#"
        UPDATE attendance_records
        SET check_in_at = ?, check_out_at = ?,
            check_in_status = ?, check_out_status = ?, status = ?,
            late_minutes = ?, early_leave_minutes = ?, overtime_minutes = ?, work_minutes = ?,
            source = ?, note = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(c.check_in_at)
    .bind(c.check_out_at)
    .bind(c.check_in_status.as_str())
    .bind(c.check_out_status.as_str())
    .bind(c.status.as_str())
    .bind(c.late_minutes)
    .bind(c.early_leave_minutes)
    .bind(c.overtime_minutes)
    .bind(c.work_minutes)
    .bind(RecordSource::Manual.as_str())
    .bind(note)
    .bind(now)
    .bind(id)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(status = %c.status, "Attendance record overridden");

    get_record(pool, settings.timezone, id, now).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn month_bounds_handle_year_end_and_february() {
        assert_eq!(month_bounds(d(2026, 10, 19)), (d(2026, 10, 1), d(2026, 10, 31)));
        assert_eq!(month_bounds(d(2026, 12, 31)), (d(2026, 12, 1), d(2026, 12, 31)));
        assert_eq!(month_bounds(d(2028, 2, 10)), (d(2028, 2, 1), d(2028, 2, 29)));
    }

    #[test]
    fn history_defaults_to_current_month() {
        let today = d(2026, 10, 19);
        assert_eq!(history_range(None, None, today).unwrap(), (d(2026, 10, 1), d(2026, 10, 31)));
        assert_eq!(
            history_range(Some(d(2026, 9, 15)), None, today).unwrap(),
            (d(2026, 9, 15), d(2026, 9, 30))
        );
    }

    #[test]
    fn history_rejects_bad_ranges() {
        let today = d(2026, 10, 19);
        assert!(matches!(
            history_range(Some(d(2026, 10, 2)), Some(d(2026, 10, 1)), today),
            Err(AppError::Validation(_))
        ));
        assert!(history_range(Some(d(2025, 1, 1)), Some(d(2026, 10, 1)), today).is_err());
    }
}
