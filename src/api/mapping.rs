use actix_web::{HttpResponse, Responder, web};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::MySqlPool;
use utoipa::{IntoParams, ToSchema};

use crate::auth::auth::AuthUser;
use crate::config::Config;
use crate::error::AppError;
use crate::model::device_mapping::{DevicePair, DeviceUserMapping};
use crate::service::mapping::{
    MappingFilter, MappingListResponse, UnmappedFilter, UnmappedListResponse, UpsertMapping,
    clean_pair, list_mappings, list_unmapped, remove_mapping, upsert_mapping,
};
use crate::service::reconcile::{ReconcileSummary, recompute_days, reconcile_range};
use crate::service::window::local_date;

#[derive(Serialize, ToSchema)]
pub struct MappingWriteResponse {
    pub mapping: DeviceUserMapping,
    /// Re-reconciliation of the trailing window after the write.
    pub reconcile: ReconcileSummary,
}

#[derive(Deserialize, IntoParams)]
pub struct PairQuery {
    pub device_code: String,
    pub device_user_code: String,
}

/// Re-runs the trailing window so a corrected binding heals recent days.
///
/// The pair's new owner is reconciled from its events; a previous owner gets its
/// planned days recomputed, since the punches no longer count for them.
async fn heal(
    pool: &MySqlPool,
    config: &Config,
    pair: Option<&DevicePair>,
    previous_employee_id: Option<u64>,
) -> ReconcileSummary {
    let settings = config.engine();
    let now = Utc::now();
    let from = now - config.remap_lookback();
    let mut summary = ReconcileSummary::default();

    if let Some(pair) = pair {
        match reconcile_range(
            pool,
            &settings,
            Some(std::slice::from_ref(pair)),
            from,
            now,
            config.reconcile_batch_size,
            now,
        )
        .await
        {
            Ok(s) => summary.combine(s),
            Err(e) => {
                tracing::error!(error = %e, device_code = %pair.device_code, "Remap reconciliation failed");
                summary.failed += 1;
            }
        }
    }

    if let Some(employee_id) = previous_employee_id {
        let tz = settings.timezone;
        match recompute_days(pool, &settings, employee_id, local_date(from, tz), local_date(now, tz), now).await {
            Ok(s) => summary.combine(s),
            Err(e) => {
                tracing::error!(error = %e, employee_id, "Recompute of previous owner failed");
                summary.failed += 1;
            }
        }
    }

    summary
}

/// List device mappings
#[utoipa::path(
    get,
    path = "/api/device-mappings",
    params(MappingFilter),
    responses(
        (status = 200, description = "Paginated mappings", body = MappingListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Device mapping"
)]
pub async fn mapping_list(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<MappingFilter>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let list = list_mappings(pool.get_ref(), &query).await?;
    Ok(HttpResponse::Ok().json(list))
}

/// Bind a device identity to an employee
#[utoipa::path(
    put,
    path = "/api/device-mappings",
    request_body(
        content = UpsertMapping,
        description = "Create or replace the binding of one device identity",
        content_type = "application/json"
    ),
    responses(
        (status = 200, description = "Mapping stored and recent punches re-reconciled", body = MappingWriteResponse),
        (status = 400, description = "Missing device codes", body = Object, example = json!({
            "message": "device_code is required"
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Employee not found", body = Object, example = json!({
            "message": "employee 12 does not exist"
        }))
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Device mapping"
)]
pub async fn mapping_upsert(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<UpsertMapping>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let change = upsert_mapping(pool.get_ref(), &payload).await?;
    let mapping = change.mapping;

    let active_pair = mapping.is_active.then(|| mapping.pair());
    let previous = change
        .previous_employee_id
        .filter(|prev| *prev != mapping.employee_id || !mapping.is_active);
    let reconcile = heal(pool.get_ref(), &config, active_pair.as_ref(), previous).await;

    tracing::info!(mapping_id = mapping.id, by = %auth.username, "Device mapping written");
    Ok(HttpResponse::Ok().json(MappingWriteResponse { mapping, reconcile }))
}

/// Remove a device mapping
#[utoipa::path(
    delete,
    path = "/api/device-mappings",
    params(PairQuery),
    responses(
        (status = 200, description = "Mapping removed", body = Object, example = json!({
            "message": "Mapping removed",
            "removed": 1
        })),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Mapping not found")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Device mapping"
)]
pub async fn mapping_delete(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    query: web::Query<PairQuery>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let pair = clean_pair(&query.device_code, &query.device_user_code)?;
    let (removed, employee_id) = remove_mapping(pool.get_ref(), &pair).await?;
    if removed == 0 {
        return Err(AppError::not_found("Mapping not found").into());
    }

    let reconcile = heal(pool.get_ref(), &config, None, employee_id).await;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "message": "Mapping removed",
        "removed": removed,
        "reconcile": reconcile
    })))
}

/// Device identities seen in the ledger but not bound to anyone
#[utoipa::path(
    get,
    path = "/api/device-mappings/unmapped",
    params(UnmappedFilter),
    responses(
        (status = 200, description = "Paginated unmapped pairs", body = UnmappedListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Device mapping"
)]
pub async fn mapping_unmapped(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<UnmappedFilter>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let list = list_unmapped(pool.get_ref(), &query).await?;
    Ok(HttpResponse::Ok().json(list))
}
