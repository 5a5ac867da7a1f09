use anyhow::{Context, Result, anyhow};
use chrono::Duration;
use chrono_tz::Tz;
use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

use crate::service::window::MatchTolerance;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub server_addr: String,
    pub api_prefix: String,
    pub db_max_connections: u32,

    // Rate limiting
    pub rate_protected_per_min: u32,
    pub rate_ingest_per_min: u32,

    /// Wall-clock zone every shift and punch is interpreted in.
    pub business_timezone: Tz,
    /// When set, device deliveries must present it in `X-Device-Key`.
    pub device_ingest_secret: Option<String>,
    pub ingest_chunk_size: usize,
    pub reconcile_on_ingest: bool,
    pub reconcile_batch_size: u32,

    pub checkin_lead_minutes: i64,
    pub checkout_trail_minutes: i64,
    pub duplicate_punch_seconds: i64,
    pub remap_lookback_hours: i64,

    pub sweep_interval_secs: u64,
    pub reconcile_interval_secs: u64,
}

/// The part of the configuration the reconciliation engine reads.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    pub timezone: Tz,
    pub tolerance: MatchTolerance,
}

fn required(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("{key} must be set"))
}

fn parsed_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow!("invalid value for {key} ({raw}): {e}")),
        _ => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let timezone = env::var("BUSINESS_TIMEZONE").unwrap_or_else(|_| "UTC".to_string());
        let business_timezone = timezone
            .parse::<Tz>()
            .map_err(|e| anyhow!("invalid BUSINESS_TIMEZONE ({timezone}): {e}"))?;

        let device_ingest_secret = env::var("DEVICE_INGEST_SECRET")
            .ok()
            .filter(|s| !s.trim().is_empty());

        let config = Self {
            server_addr: required("SERVER_ADDR")?,
            database_url: required("DATABASE_URL")?,
            jwt_secret: required("JWT_SECRET")?,
            api_prefix: env::var("API_PREFIX").unwrap_or_else(|_| "/api".to_string()),
            db_max_connections: parsed_or("DB_MAX_CONNECTIONS", 10)?,

            rate_protected_per_min: parsed_or("RATE_PROTECTED_PER_MIN", 1000)?,
            rate_ingest_per_min: parsed_or("RATE_INGEST_PER_MIN", 600)?,

            business_timezone,
            device_ingest_secret,
            ingest_chunk_size: parsed_or("INGEST_CHUNK_SIZE", 500)?,
            reconcile_on_ingest: parsed_or("RECONCILE_ON_INGEST", true)?,
            reconcile_batch_size: parsed_or("RECONCILE_BATCH_SIZE", 1000)?,

            checkin_lead_minutes: parsed_or("CHECKIN_LEAD_MINUTES", 120)?,
            checkout_trail_minutes: parsed_or("CHECKOUT_TRAIL_MINUTES", 240)?,
            duplicate_punch_seconds: parsed_or("DUPLICATE_PUNCH_SECONDS", 60)?,
            remap_lookback_hours: parsed_or("REMAP_LOOKBACK_HOURS", 48)?,

            sweep_interval_secs: parsed_or("SWEEP_INTERVAL_SECS", 300)?,
            reconcile_interval_secs: parsed_or("RECONCILE_INTERVAL_SECS", 0)?,
        };

        if config.ingest_chunk_size == 0 {
            return Err(anyhow!("INGEST_CHUNK_SIZE must be greater than zero"));
        }
        if config.checkin_lead_minutes < 0
            || config.checkout_trail_minutes < 0
            || config.duplicate_punch_seconds < 0
        {
            return Err(anyhow!("punch tolerances must not be negative"));
        }

        Ok(config)
    }

    pub fn engine(&self) -> EngineSettings {
        EngineSettings {
            timezone: self.business_timezone,
            tolerance: MatchTolerance {
                checkin_lead: Duration::minutes(self.checkin_lead_minutes),
                checkout_trail: Duration::minutes(self.checkout_trail_minutes),
                duplicate_punch: Duration::seconds(self.duplicate_punch_seconds),
            },
        }
    }

    pub fn remap_lookback(&self) -> Duration {
        Duration::hours(self.remap_lookback_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parsed_or_falls_back_when_unset() {
        let value: u32 = parsed_or("HRM_ATTENDANCE_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn timezone_names_parse() {
        let tz: Tz = "Asia/Ho_Chi_Minh".parse().unwrap();
        assert_eq!(tz, chrono_tz::Asia::Ho_Chi_Minh);
        assert!("Mars/Olympus".parse::<Tz>().is_err());
    }
}
