use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use sqlx::MySqlPool;

use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::model::schedule::PlannedSchedule;
use crate::service::schedule::{AssignShift, AssignmentSummary, ScheduleFilter, assign_shift, list_schedules};
use crate::service::window::local_date;

/// Assign a shift over a date range
#[utoipa::path(
    post,
    path = "/api/schedules",
    request_body(
        content = AssignShift,
        description = "Shift to snapshot onto every date of the inclusive range",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Days planned and recomputed", body = AssignmentSummary),
        (status = 400, description = "Invalid range", body = Object, example = json!({
            "message": "from must not be after to"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Employee or shift not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Schedule"
)]
pub async fn schedule_assign(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<AssignShift>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let summary = assign_shift(pool.get_ref(), &config.engine(), &payload, Utc::now()).await?;

    tracing::info!(
        employee_id = summary.employee_id,
        days = summary.days,
        by = %auth.username,
        "Shift assignment stored"
    );
    Ok(HttpResponse::Ok().json(summary))
}

/// List planned days
#[utoipa::path(
    get,
    path = "/api/schedules",
    params(ScheduleFilter),
    responses(
        (status = 200, description = "Planned days, newest first", body = [PlannedSchedule]),
        (status = 400, description = "Invalid range"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Schedule"
)]
pub async fn schedule_list(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<ScheduleFilter>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let today = local_date(Utc::now(), config.business_timezone);
    let data = list_schedules(pool.get_ref(), &query, today).await?;

    Ok(HttpResponse::Ok().json(serde_json::json!({ "data": data })))
}
