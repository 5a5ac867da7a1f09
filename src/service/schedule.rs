use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{error, info, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::config::EngineSettings;
use crate::error::{AppError, AppResult};
use crate::model::attendance::{AttendanceStatus, CheckStatus, RecordSource};
use crate::model::schedule::{PlannedSchedule, ShiftDefinition};
use crate::service::reconcile::{ReconcileSummary, recompute_days};

/// Longest range one assignment may cover.
pub const MAX_ASSIGN_DAYS: i64 = 366;

#[derive(Debug, Deserialize, ToSchema)]
pub struct AssignShift {
    #[schema(example = 12)]
    pub employee_id: u64,
    #[schema(example = 3)]
    pub shift_id: u64,
    #[schema(value_type = String, format = "date", example = "2026-11-01")]
    pub from: NaiveDate,
    #[schema(value_type = String, format = "date", example = "2026-11-30")]
    pub to: NaiveDate,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AssignmentSummary {
    pub employee_id: u64,
    pub shift_id: u64,
    /// Days planned (new or replaced).
    pub days: usize,
    pub reconcile: ReconcileSummary,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ScheduleFilter {
    pub employee_id: Option<u64>,
    #[param(value_type = String)]
    pub from: Option<NaiveDate>,
    #[param(value_type = String)]
    pub to: Option<NaiveDate>,
}

/// Inclusive list of dates in `[from, to]`, bounded by [`MAX_ASSIGN_DAYS`].
pub fn assignment_dates(from: NaiveDate, to: NaiveDate) -> AppResult<Vec<NaiveDate>> {
    if from > to {
        return Err(AppError::validation("from must not be after to"));
    }
    let span = (to - from).num_days() + 1;
    if span > MAX_ASSIGN_DAYS {
        return Err(AppError::validation(format!(
            "an assignment may cover at most {MAX_ASSIGN_DAYS} days"
        )));
    }
    Ok(from.iter_days().take(span as usize).collect())
}

async fn load_shift(pool: &MySqlPool, shift_id: u64) -> AppResult<ShiftDefinition> {
    sqlx::query_as::<_, ShiftDefinition>(
        r#"
        SELECT id, name, start_time, end_time, break_minutes,
               late_grace_minutes, early_grace_minutes, overtime_threshold_minutes
        FROM shifts
        WHERE id = ?
        "#,
    )
    .bind(shift_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| AppError::not_found(format!("shift {shift_id} does not exist")))
}

/// Plans `shift_id` for the employee on every date of the range.
///
/// Existing plans in the range are replaced by the new snapshot. Every planned day
/// gets an `INCOMPLETE` record if it has none, and the range is then recomputed
/// from the ledger so days already in the past settle immediately.
#[instrument(skip(pool, settings, req), fields(employee_id = req.employee_id, shift_id = req.shift_id))]
pub async fn assign_shift(
    pool: &MySqlPool,
    settings: &EngineSettings,
    req: &AssignShift,
    now: DateTime<Utc>,
) -> AppResult<AssignmentSummary> {
    let dates = assignment_dates(req.from, req.to)?;

    let employee_exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM employees WHERE id = ?")
        .bind(req.employee_id)
        .fetch_one(pool)
        .await?
        > 0;
    if !employee_exists {
        return Err(AppError::not_found(format!(
            "employee {} does not exist",
            req.employee_id
        )));
    }
    let shift = load_shift(pool, req.shift_id).await?;

    let mut tx = pool.begin().await?;

    let mut plans = QueryBuilder::<MySql>::new(
        "INSERT INTO planned_schedules \
         (employee_id, date, shift_id, planned_name, planned_start, planned_end, \
          planned_break_minutes, late_grace_minutes, early_grace_minutes, overtime_threshold_minutes) ",
    );
    plans.push_values(&dates, |mut row, date| {
        row.push_bind(req.employee_id)
            .push_bind(*date)
            .push_bind(shift.id)
            .push_bind(shift.name.clone())
            .push_bind(shift.start_time)
            .push_bind(shift.end_time)
            .push_bind(shift.break_minutes)
            .push_bind(shift.late_grace_minutes)
            .push_bind(shift.early_grace_minutes)
            .push_bind(shift.overtime_threshold_minutes);
    });
    plans.push(
        " ON DUPLICATE KEY UPDATE \
         shift_id = VALUES(shift_id), \
         planned_name = VALUES(planned_name), \
         planned_start = VALUES(planned_start), \
         planned_end = VALUES(planned_end), \
         planned_break_minutes = VALUES(planned_break_minutes), \
         late_grace_minutes = VALUES(late_grace_minutes), \
         early_grace_minutes = VALUES(early_grace_minutes), \
         overtime_threshold_minutes = VALUES(overtime_threshold_minutes)",
    );
    plans.build().execute(&mut *tx).await?;

    sqlx::query(
        r#"
        INSERT INTO attendance_records
            (employee_id, date, schedule_id, check_in_status, check_out_status, status, source, updated_at)
        SELECT p.employee_id, p.date, p.id, ?, ?, ?, ?, ?
        FROM planned_schedules p
        WHERE p.employee_id = ? AND p.date BETWEEN ? AND ?
        ON DUPLICATE KEY UPDATE schedule_id = p.id
        "#,
    )
    .bind(CheckStatus::Pending.as_str())
    .bind(CheckStatus::Pending.as_str())
    .bind(AttendanceStatus::Incomplete.as_str())
    .bind(RecordSource::Device.as_str())
    .bind(now)
    .bind(req.employee_id)
    .bind(req.from)
    .bind(req.to)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    info!(days = dates.len(), shift = %shift.name, "Shift assigned");

    let reconcile = match recompute_days(pool, settings, req.employee_id, req.from, req.to, now).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Recompute after assignment failed");
            ReconcileSummary {
                failed: dates.len(),
                ..Default::default()
            }
        }
    };

    Ok(AssignmentSummary {
        employee_id: req.employee_id,
        shift_id: shift.id,
        days: dates.len(),
        reconcile,
    })
}

/// Planned days, newest first. Without a range, the last 31 days through the next 31.
pub async fn list_schedules(
    pool: &MySqlPool,
    filter: &ScheduleFilter,
    today: NaiveDate,
) -> AppResult<Vec<PlannedSchedule>> {
    let from = filter.from.unwrap_or(today - Duration::days(31));
    let to = filter.to.unwrap_or(today + Duration::days(31));
    if from > to {
        return Err(AppError::validation("from must not be after to"));
    }

    let mut qb = QueryBuilder::<MySql>::new(
        "SELECT id, employee_id, date, shift_id, planned_name, planned_start, planned_end, \
         planned_break_minutes, late_grace_minutes, early_grace_minutes, overtime_threshold_minutes \
         FROM planned_schedules WHERE date BETWEEN ",
    );
    qb.push_bind(from).push(" AND ").push_bind(to);
    if let Some(employee_id) = filter.employee_id {
        qb.push(" AND employee_id = ").push_bind(employee_id);
    }
    qb.push(" ORDER BY date DESC, employee_id");

    Ok(qb.build_query_as::<PlannedSchedule>().fetch_all(pool).await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn range_is_inclusive() {
        let dates = assignment_dates(d(2026, 2, 27), d(2026, 3, 2)).unwrap();
        assert_eq!(
            dates,
            vec![d(2026, 2, 27), d(2026, 2, 28), d(2026, 3, 1), d(2026, 3, 2)]
        );
        assert_eq!(assignment_dates(d(2026, 5, 5), d(2026, 5, 5)).unwrap().len(), 1);
    }

    #[test]
    fn inverted_or_oversized_ranges_are_rejected() {
        assert!(matches!(
            assignment_dates(d(2026, 3, 2), d(2026, 3, 1)),
            Err(AppError::Validation(_))
        ));
        assert_eq!(assignment_dates(d(2026, 1, 1), d(2027, 1, 1)).unwrap().len(), 366);
        assert!(assignment_dates(d(2026, 1, 1), d(2027, 1, 2)).is_err());
    }
}
