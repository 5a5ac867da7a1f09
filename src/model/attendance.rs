use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};
use utoipa::ToSchema;

use crate::error::AppError;

/// Outcome of one side (in or out) of a shift.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, IntoStaticStr, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckStatus {
    Pending,
    OnTime,
    Late,
    Early,
    Missed,
}

/// Overall classification of an employee-day.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, IntoStaticStr, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum AttendanceStatus {
    Incomplete,
    Present,
    Late,
    EarlyLeave,
    LateAndEarly,
    Absent,
    NonCompliant,
    Overtime,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, EnumString, IntoStaticStr, Display,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RecordSource {
    Manual,
    Device,
}

impl CheckStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl AttendanceStatus {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

impl RecordSource {
    pub fn as_str(self) -> &'static str {
        self.into()
    }
}

pub(crate) fn parse_column<T: std::str::FromStr>(column: &str, raw: &str) -> Result<T, AppError> {
    raw.parse()
        .map_err(|_| AppError::Store(format!("unexpected {column} value '{raw}'")))
}

/// `attendance_records` joined with the planned snapshot it was built against.
#[derive(Debug, sqlx::FromRow)]
pub struct AttendanceRow {
    pub id: u64,
    pub employee_id: u64,
    pub date: NaiveDate,
    pub schedule_id: Option<u64>,
    pub check_in_at: Option<DateTime<Utc>>,
    pub check_out_at: Option<DateTime<Utc>>,
    pub check_in_status: String,
    pub check_out_status: String,
    pub status: String,
    pub late_minutes: i32,
    pub early_leave_minutes: i32,
    pub overtime_minutes: i32,
    pub work_minutes: i32,
    pub source: String,
    pub note: Option<String>,
    pub updated_at: DateTime<Utc>,
    pub planned_name: Option<String>,
    pub planned_start: Option<NaiveTime>,
    pub planned_end: Option<NaiveTime>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct AttendanceRecord {
    pub id: u64,
    pub employee_id: u64,
    #[schema(value_type = String, format = "date", example = "2026-10-19")]
    pub date: NaiveDate,
    pub schedule_id: Option<u64>,
    #[schema(value_type = String, format = "date-time", nullable = true)]
    pub check_in_at: Option<DateTime<Utc>>,
    #[schema(value_type = String, format = "date-time", nullable = true)]
    pub check_out_at: Option<DateTime<Utc>>,
    pub check_in_status: CheckStatus,
    pub check_out_status: CheckStatus,
    pub status: AttendanceStatus,
    /// `status` as it reads once the sweeper has caught up with elapsed shifts.
    pub effective_status: AttendanceStatus,
    pub late_minutes: i32,
    pub early_leave_minutes: i32,
    pub overtime_minutes: i32,
    pub work_minutes: i32,
    pub source: RecordSource,
    pub note: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
    pub planned_name: Option<String>,
    #[schema(value_type = String, nullable = true, example = "08:00")]
    pub planned_start: Option<NaiveTime>,
    #[schema(value_type = String, nullable = true, example = "17:00")]
    pub planned_end: Option<NaiveTime>,
}

impl TryFrom<AttendanceRow> for AttendanceRecord {
    type Error = AppError;

    fn try_from(row: AttendanceRow) -> Result<Self, Self::Error> {
        let status = parse_column("status", &row.status)?;
        Ok(Self {
            id: row.id,
            employee_id: row.employee_id,
            date: row.date,
            schedule_id: row.schedule_id,
            check_in_at: row.check_in_at,
            check_out_at: row.check_out_at,
            check_in_status: parse_column("check_in_status", &row.check_in_status)?,
            check_out_status: parse_column("check_out_status", &row.check_out_status)?,
            status,
            effective_status: status,
            late_minutes: row.late_minutes,
            early_leave_minutes: row.early_leave_minutes,
            overtime_minutes: row.overtime_minutes,
            work_minutes: row.work_minutes,
            source: parse_column("source", &row.source)?,
            note: row.note,
            updated_at: row.updated_at,
            planned_name: row.planned_name,
            planned_start: row.planned_start,
            planned_end: row.planned_end,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statuses_use_screaming_snake_case_everywhere() {
        assert_eq!(AttendanceStatus::LateAndEarly.as_str(), "LATE_AND_EARLY");
        assert_eq!(
            "NON_COMPLIANT".parse::<AttendanceStatus>().unwrap(),
            AttendanceStatus::NonCompliant
        );
        assert_eq!(CheckStatus::OnTime.to_string(), "ON_TIME");
        assert_eq!(
            serde_json::to_value(AttendanceStatus::EarlyLeave).unwrap(),
            serde_json::json!("EARLY_LEAVE")
        );
        assert_eq!(RecordSource::Device.as_str(), "DEVICE");
    }

    #[test]
    fn unknown_column_value_is_a_store_error() {
        let err = parse_column::<CheckStatus>("check_in_status", "SOMETIMES").unwrap_err();
        assert!(matches!(err, AppError::Store(_)));
    }
}
