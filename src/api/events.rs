use actix_web::{HttpResponse, Responder, web};
use sqlx::MySqlPool;

use crate::auth::auth::AuthUser;
use crate::service::ingest::{EventFilter, EventListResponse, list_events};

/// Browse the raw punch ledger
#[utoipa::path(
    get,
    path = "/api/device-events",
    params(EventFilter),
    responses(
        (status = 200, description = "Ledger events, newest first", body = EventListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden")
    ),
    security(
        ("bearer_auth" = [])
    ),
    tag = "Device"
)]
pub async fn event_list(
    auth: AuthUser,
    pool: web::Data<MySqlPool>,
    query: web::Query<EventFilter>,
) -> actix_web::Result<impl Responder> {
    auth.require_hr_or_admin()?;

    let list = list_events(pool.get_ref(), &query).await?;
    Ok(HttpResponse::Ok().json(list))
}
