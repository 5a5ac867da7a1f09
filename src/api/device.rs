use actix_web::{HttpRequest, HttpResponse, Responder, web};
use chrono::Utc;
use serde::Serialize;
use sqlx::MySqlPool;
use utoipa::ToSchema;

use crate::auth::device_key::check_device_key;
use crate::config::Config;
use crate::error::AppError;
use crate::model::punch::IngestRequest;
use crate::service::ingest::{IngestOutcome, ingest};
use crate::service::reconcile::{ReconcileSummary, reconcile_range};

#[derive(Serialize, ToSchema)]
#[schema(example = json!({
    "ok": true,
    "received": 3,
    "inserted": 2,
    "skipped": 1,
    "failed": 0,
    "reconcile": {
        "scanned": 2,
        "matched": 2,
        "records_updated": 1,
        "skipped": 0,
        "failed": 0,
        "has_more": false
    }
}))]
pub struct IngestResponse {
    pub ok: bool,
    pub received: usize,
    pub inserted: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Present when the delivery was reconciled right away.
    pub reconcile: Option<ReconcileSummary>,
}

/// Reconciles what a delivery touched. Failures are logged, never returned.
async fn reconcile_delivery(
    pool: &MySqlPool,
    config: &Config,
    outcome: &IngestOutcome,
) -> Option<ReconcileSummary> {
    let (from, to) = outcome.span?;
    if outcome.pairs.is_empty() {
        return None;
    }
    let batch = config
        .reconcile_batch_size
        .max(outcome.summary.received as u32);

    match reconcile_range(
        pool,
        &config.engine(),
        Some(outcome.pairs.as_slice()),
        from,
        to,
        batch,
        Utc::now(),
    )
    .await
    {
        Ok(summary) => Some(summary),
        Err(e) => {
            tracing::error!(error = %e, pairs = outcome.pairs.len(), "Reconcile after ingest failed");
            None
        }
    }
}

/// Device punch delivery
#[utoipa::path(
    post,
    path = "/device/punches",
    request_body(
        content = IngestRequest,
        description = "Punches buffered by one clocking device",
        content_type = "application/json"
    ),
    params(
        ("X-Device-Key" = Option<String>, Header, description = "Shared secret, required when configured")
    ),
    responses(
        (status = 200, description = "Delivery stored; unusable logs are counted, not rejected", body = IngestResponse),
        (status = 400, description = "Malformed payload", body = Object, example = json!({
            "message": "deviceCode is required"
        })),
        (status = 401, description = "Missing or wrong device key", body = Object, example = json!({
            "message": "Invalid device key"
        })),
        (status = 429, description = "Too many requests")
    ),
    tag = "Device"
)]
pub async fn ingest_punches(
    req: HttpRequest,
    pool: web::Data<MySqlPool>,
    config: web::Data<Config>,
    payload: web::Json<IngestRequest>,
) -> actix_web::Result<impl Responder> {
    check_device_key(&req, config.device_ingest_secret.as_deref())?;

    if payload.device_code.trim().is_empty() {
        return Err(AppError::validation("deviceCode is required").into());
    }

    let outcome = ingest(pool.get_ref(), config.ingest_chunk_size, &payload).await;

    let reconcile = if config.reconcile_on_ingest {
        reconcile_delivery(pool.get_ref(), &config, &outcome).await
    } else {
        None
    };

    let summary = outcome.summary;
    Ok(HttpResponse::Ok().json(IngestResponse {
        ok: true,
        received: summary.received,
        inserted: summary.inserted,
        skipped: summary.skipped,
        failed: summary.failed,
        reconcile,
    }))
}
