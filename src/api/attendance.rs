use actix_web::{HttpResponse, Responder, web};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use utoipa::ToSchema;

use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::model::attendance::AttendanceRecord;
use crate::model::device_mapping::DevicePair;
use crate::service::attendance::{HistoryQuery, OverrideRequest, history, history_range, override_record};
use crate::service::reconcile::{ReconcileSummary, reconcile_pending, reconcile_range};
use crate::service::sweeper::{SweepSummary, sweep};
use crate::service::window::local_date;

#[derive(Serialize, ToSchema)]
pub struct HistoryResponse {
    pub data: Vec<AttendanceRecord>,
    #[schema(value_type = String, format = "date", example = "2026-10-01")]
    pub from: NaiveDate,
    #[schema(value_type = String, format = "date", example = "2026-10-31")]
    pub to: NaiveDate,
}

#[derive(Deserialize, ToSchema)]
pub struct ReconcileRequest {
    /// Ledger events to process in this call; defaults to the configured batch size.
    #[schema(example = 1000)]
    pub batch_size: Option<u32>,
}

#[derive(Deserialize, ToSchema)]
pub struct RangeReconcileRequest {
    /// Restrict to these device identities; all mapped identities when omitted.
    pub pairs: Option<Vec<DevicePair>>,
    #[schema(value_type = String, format = "date-time", example = "2026-10-01T00:00:00Z")]
    pub from: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time", example = "2026-10-02T00:00:00Z")]
    pub to: DateTime<Utc>,
    pub batch_size: Option<u32>,
}

/// Attendance history
#[utoipa::path(
    get,
    path = "/api/attendance",
    params(HistoryQuery),
    responses(
        (status = 200, description = "Classified employee-days, current month by default", body = HistoryResponse),
        (status = 400, description = "Invalid range", body = Object, example = json!({
            "message": "from must not be after to"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn attendance_history(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<HistoryQuery>,
) -> actix_web::Result<impl Responder> {
    let employee_id = auth.attendance_scope(query.employee_id)?;

    let tz = config.business_timezone;
    let now = Utc::now();
    let (from, to) = history_range(query.from, query.to, local_date(now, tz))?;

    let data = history(pool.get_ref(), tz, employee_id, from, to, now).await?;

    Ok(HttpResponse::Ok().json(HistoryResponse { data, from, to }))
}

/// Correct an attendance record by hand
#[utoipa::path(
    put,
    path = "/api/attendance/{id}/override",
    params(
        ("id" = u64, Path, description = "Attendance record id")
    ),
    request_body(
        content = OverrideRequest,
        description = "Check instants to apply; the record is reclassified and marked MANUAL",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Record after the override", body = AttendanceRecord),
        (status = 400, description = "Check-out before check-in", body = Object, example = json!({
            "message": "check_out_at must not be before check_in_at"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Record not found"),
        (status = 409, description = "Record has no planned shift")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn override_attendance(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    path: web::Path<u64>,
    payload: web::Json<OverrideRequest>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let id = path.into_inner();
    let record = override_record(pool.get_ref(), &config.engine(), id, &payload, Utc::now()).await?;

    tracing::info!(record_id = id, by = %auth.username, "Attendance overridden");
    Ok(HttpResponse::Ok().json(record))
}

/// Reconcile pending ledger events
#[utoipa::path(
    post,
    path = "/api/attendance/reconcile",
    request_body(
        content = ReconcileRequest,
        description = "Optional; the body may be omitted",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Run counters; call again while has_more is true", body = ReconcileSummary),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn reconcile(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: Option<web::Json<ReconcileRequest>>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let batch_size = payload
        .and_then(|p| p.batch_size)
        .unwrap_or(config.reconcile_batch_size);
    let summary = reconcile_pending(pool.get_ref(), &config.engine(), batch_size, Utc::now()).await?;

    Ok(HttpResponse::Ok().json(summary))
}

/// Reconcile a time range
#[utoipa::path(
    post,
    path = "/api/attendance/reconcile/range",
    request_body(
        content = RangeReconcileRequest,
        description = "Range of ledger events to (re)process, optionally for some device identities",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Run counters", body = ReconcileSummary),
        (status = 400, description = "Invalid range"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn reconcile_window(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<RangeReconcileRequest>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let req = payload.into_inner();
    let summary = reconcile_range(
        pool.get_ref(),
        &config.engine(),
        req.pairs.as_deref(),
        req.from,
        req.to,
        req.batch_size.unwrap_or(config.reconcile_batch_size),
        Utc::now(),
    )
    .await?;

    Ok(HttpResponse::Ok().json(summary))
}

/// Finalize elapsed incomplete days now
#[utoipa::path(
    post,
    path = "/api/attendance/sweep",
    responses(
        (status = 200, description = "Sweep counters", body = SweepSummary),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Attendance"
)]
pub async fn run_sweep(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
) -> actix_web::Result<impl Responder> {
    auth.require_admin()?;

    let summary = sweep(
        pool.get_ref(),
        config.business_timezone,
        config.reconcile_batch_size as usize,
        Utc::now(),
    )
    .await?;

    Ok(HttpResponse::Ok().json(summary))
}
