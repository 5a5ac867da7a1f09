use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use utoipa::ToSchema;

use crate::service::classify::ShiftPolicy;

/// Shift definition owned by the shift CRUD screens; read-only here.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ShiftDefinition {
    pub id: u64,
    pub name: String,
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
    pub break_minutes: i32,
    pub late_grace_minutes: i32,
    pub early_grace_minutes: i32,
    pub overtime_threshold_minutes: i32,
}

/// One employee's planned shift on one date.
///
/// The `planned_*` and grace columns are a copy of the shift taken at assignment
/// time, so editing a shift later never rewrites history.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct PlannedSchedule {
    pub id: u64,
    pub employee_id: u64,
    #[schema(value_type = String, format = "date")]
    pub date: NaiveDate,
    pub shift_id: Option<u64>,
    pub planned_name: String,
    #[schema(value_type = String, example = "08:00")]
    pub planned_start: NaiveTime,
    #[schema(value_type = String, example = "17:00")]
    pub planned_end: NaiveTime,
    pub planned_break_minutes: i32,
    pub late_grace_minutes: i32,
    pub early_grace_minutes: i32,
    pub overtime_threshold_minutes: i32,
}

impl PlannedSchedule {
    pub fn policy(&self) -> ShiftPolicy {
        ShiftPolicy {
            break_minutes: self.planned_break_minutes.max(0) as i64,
            late_grace_minutes: self.late_grace_minutes.max(0) as i64,
            early_grace_minutes: self.early_grace_minutes.max(0) as i64,
            overtime_threshold_minutes: self.overtime_threshold_minutes.max(0) as i64,
        }
    }
}
