use crate::{
    api::{attendance, device, events, mapping, schedule},
    auth::middleware::auth_middleware,
    config::Config,
};
use actix_governor::{
    Governor, GovernorConfigBuilder, PeerIpKeyExtractor, governor::middleware::NoOpMiddleware,
};
use actix_web::{middleware::from_fn, web};
use std::sync::Arc;

/// Per-IP limiter allowing `requests_per_min` with an equal burst.
fn build_limiter(requests_per_min: u32) -> Governor<PeerIpKeyExtractor, NoOpMiddleware> {
    let requests_per_min = requests_per_min.max(1);
    let per_ms = (60_000 / requests_per_min as u64).max(1);
    let cfg = GovernorConfigBuilder::default()
        .per_millisecond(per_ms)
        .burst_size(requests_per_min)
        .key_extractor(PeerIpKeyExtractor)
        .finish()
        .unwrap_or_default();
    Governor::new(&cfg)
}

pub fn configure(cfg: &mut web::ServiceConfig, config: Config) {
    let ingest_limiter = Arc::new(build_limiter(config.rate_ingest_per_min));
    let protected_limiter = Arc::new(build_limiter(config.rate_protected_per_min));

    // Device agents authenticate with the shared device key, not a user token
    cfg.service(
        web::scope("/device").service(
            web::resource("/punches")
                .wrap(ingest_limiter)
                .route(web::post().to(device::ingest_punches)),
        ),
    );

    // Protected routes
    cfg.service(
        web::scope(&config.api_prefix)
            .wrap(from_fn(auth_middleware)) // authentication
            .wrap(protected_limiter) // rate limiting
            .service(
                web::scope("/attendance")
                    // /attendance
                    .service(web::resource("").route(web::get().to(attendance::attendance_history)))
                    // /attendance/reconcile
                    .service(web::resource("/reconcile").route(web::post().to(attendance::reconcile)))
                    // /attendance/reconcile/range
                    .service(
                        web::resource("/reconcile/range")
                            .route(web::post().to(attendance::reconcile_window)),
                    )
                    // /attendance/sweep
                    .service(web::resource("/sweep").route(web::post().to(attendance::run_sweep)))
                    // /attendance/{id}/override
                    .service(
                        web::resource("/{id}/override")
                            .route(web::put().to(attendance::override_attendance)),
                    ),
            )
            .service(
                web::scope("/device-mappings")
                    // /device-mappings
                    .service(
                        web::resource("")
                            .route(web::get().to(mapping::mapping_list))
                            .route(web::put().to(mapping::mapping_upsert))
                            .route(web::delete().to(mapping::mapping_delete)),
                    )
                    // /device-mappings/unmapped
                    .service(
                        web::resource("/unmapped").route(web::get().to(mapping::mapping_unmapped)),
                    ),
            )
            .service(web::resource("/device-events").route(web::get().to(events::event_list)))
            .service(
                web::resource("/schedules")
                    .route(web::post().to(schedule::schedule_assign))
                    .route(web::get().to(schedule::schedule_list)),
            ),
    );
}
