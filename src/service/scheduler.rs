use std::time::Duration;

use actix_web::rt::{spawn, time::interval};
use chrono::Utc;
use sqlx::MySqlPool;
use tracing::{error, info};

use crate::config::Config;
use crate::service::{reconcile, sweeper};

/// Upper bound of pending batches drained per tick.
const MAX_BATCHES_PER_TICK: usize = 20;

/// Starts the periodic sweeper and pending reconciliation tasks that are enabled.
pub fn start(pool: MySqlPool, config: &Config) {
    if config.sweep_interval_secs > 0 {
        let pool = pool.clone();
        let tz = config.business_timezone;
        let batch = config.reconcile_batch_size as usize;
        let period = Duration::from_secs(config.sweep_interval_secs);

        spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                if let Err(e) = sweeper::sweep(&pool, tz, batch, Utc::now()).await {
                    error!(error = %e, "Scheduled sweep failed");
                }
            }
        });
        info!(every_secs = config.sweep_interval_secs, "Sweeper scheduled");
    }

    if config.reconcile_interval_secs > 0 {
        let settings = config.engine();
        let batch = config.reconcile_batch_size;
        let period = Duration::from_secs(config.reconcile_interval_secs);

        spawn(async move {
            let mut ticker = interval(period);
            loop {
                ticker.tick().await;
                for _ in 0..MAX_BATCHES_PER_TICK {
                    match reconcile::reconcile_pending(&pool, &settings, batch, Utc::now()).await {
                        Ok(summary) if summary.has_more => continue,
                        Ok(_) => break,
                        Err(e) => {
                            error!(error = %e, "Scheduled reconciliation failed");
                            break;
                        }
                    }
                }
            }
        });
        info!(every_secs = config.reconcile_interval_secs, "Pending reconciliation scheduled");
    }
}
