use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{debug, error, info, instrument, warn};
use utoipa::{IntoParams, ToSchema};

use crate::error::AppResult;
use crate::model::device_mapping::DevicePair;
use crate::model::punch::{DeviceLog, IngestRequest, IngestSummary, NewRawPunch, RawPunchEvent};

/// Column widths of `raw_punch_events`.
const CODE_MAX_CHARS: usize = 64;
const FLAG_MAX_CHARS: usize = 16;
const DEDUPE_KEY_MAX_CHARS: usize = 255;
const RAW_PAYLOAD_MAX_BYTES: usize = 65_535;

/// First millisecond MySQL DATETIME cannot hold (year 10000).
const DATETIME_END_MS: i64 = 253_402_300_800_000;

/// Ledger fingerprint of a punch. Identical physical punches always share it.
///
/// Text fields are length-prefixed so a separator inside a code cannot make two
/// different punches collide.
pub fn dedupe_key(
    device_code: &str,
    device_user_code: &str,
    epoch_ms: i64,
    verify_type: Option<&str>,
    in_out: Option<&str>,
) -> String {
    let field = |value: &str| format!("{}:{}", value.chars().count(), value);
    format!(
        "{}|{}|{}|{}|{}",
        field(device_code),
        field(device_user_code),
        epoch_ms,
        verify_type.map(field).unwrap_or_default(),
        in_out.map(field).unwrap_or_default()
    )
}

fn fits(value: Option<&str>, max_chars: usize) -> bool {
    value.is_none_or(|v| v.chars().count() <= max_chars)
}

fn prepare_log(batch_device: &str, machine_id: Option<&str>, log: &DeviceLog) -> Option<NewRawPunch> {
    let device_code = log
        .device_code
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(batch_device);
    if device_code.is_empty() {
        return None;
    }

    let user_code = log.user_code.as_deref()?;
    let epoch_ms = log
        .epoch_ms
        .filter(|ms| *ms > 0 && *ms < DATETIME_END_MS)?;
    let occurred_at = DateTime::from_timestamp_millis(epoch_ms)?;

    // One row the table cannot store would fail its whole chunk.
    let storable = fits(Some(device_code), CODE_MAX_CHARS)
        && fits(Some(user_code), CODE_MAX_CHARS)
        && fits(machine_id, CODE_MAX_CHARS)
        && fits(log.user_sn.as_deref(), CODE_MAX_CHARS)
        && fits(log.device_ip.as_deref(), CODE_MAX_CHARS)
        && fits(log.verify_type.as_deref(), FLAG_MAX_CHARS)
        && fits(log.in_out.as_deref(), FLAG_MAX_CHARS);
    if !storable {
        return None;
    }
    let raw_payload = log.raw.as_ref().map(|v| v.to_string());
    if raw_payload
        .as_ref()
        .is_some_and(|raw| raw.len() > RAW_PAYLOAD_MAX_BYTES)
    {
        return None;
    }

    let key = dedupe_key(
        device_code,
        user_code,
        epoch_ms,
        log.verify_type.as_deref(),
        log.in_out.as_deref(),
    );
    if key.chars().count() > DEDUPE_KEY_MAX_CHARS {
        return None;
    }

    Some(NewRawPunch {
        dedupe_key: key,
        device_code: device_code.to_string(),
        device_user_code: user_code.to_string(),
        machine_id: machine_id.map(str::to_string),
        epoch_ms,
        occurred_at,
        verify_type: log.verify_type.clone(),
        in_out: log.in_out.clone(),
        user_sn: log.user_sn.clone(),
        device_ip: log.device_ip.clone(),
        raw_payload,
    })
}

/// Validates a delivery and collapses repeated fingerprints, later entries winning.
///
/// Returns the punches to upsert and how many logs were dropped as unusable.
pub fn prepare_batch(req: &IngestRequest) -> (Vec<NewRawPunch>, usize) {
    let batch_device = req.device_code.trim();
    let machine_id = req
        .machine_id
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());

    let mut punches: Vec<NewRawPunch> = Vec::with_capacity(req.logs.len());
    let mut positions: HashMap<String, usize> = HashMap::new();
    let mut skipped = 0;

    for log in &req.logs {
        let Some(punch) = prepare_log(batch_device, machine_id, log) else {
            skipped += 1;
            continue;
        };
        match positions.get(&punch.dedupe_key) {
            Some(&i) => punches[i] = punch,
            None => {
                positions.insert(punch.dedupe_key.clone(), punches.len());
                punches.push(punch);
            }
        }
    }

    (punches, skipped)
}

/// Result of a delivery plus what it touched, for follow-up reconciliation.
#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub summary: IngestSummary,
    pub pairs: Vec<DevicePair>,
    pub span: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

#[instrument(skip(pool, req), fields(device_code = %req.device_code, logs = req.logs.len()))]
pub async fn ingest(pool: &MySqlPool, chunk_size: usize, req: &IngestRequest) -> IngestOutcome {
    let (punches, skipped) = prepare_batch(req);
    if skipped > 0 {
        warn!(skipped, "Dropped device logs without user code, usable timestamp or storable fields");
    }

    let mut outcome = IngestOutcome {
        summary: IngestSummary {
            received: req.logs.len(),
            skipped,
            ..Default::default()
        },
        ..Default::default()
    };

    for chunk in punches.chunks(chunk_size.max(1)) {
        match upsert_chunk(pool, chunk).await {
            Ok(inserted) => outcome.summary.inserted += inserted,
            Err(e) => {
                error!(error = %e, size = chunk.len(), "Ledger chunk failed; earlier chunks are kept");
                outcome.summary.failed += chunk.len();
            }
        }
    }

    outcome.pairs = punches
        .iter()
        .map(|p| DevicePair::new(p.device_code.clone(), p.device_user_code.clone()))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let earliest = punches.iter().map(|p| p.occurred_at).min();
    let latest = punches.iter().map(|p| p.occurred_at).max();
    outcome.span = earliest.zip(latest);

    info!(summary = ?outcome.summary, "Device delivery stored");
    outcome
}

/// Upserts one chunk in its own transaction and returns how many keys were new.
async fn upsert_chunk(pool: &MySqlPool, chunk: &[NewRawPunch]) -> AppResult<usize> {
    let mut tx = pool.begin().await?;

    let mut existing_q =
        QueryBuilder::<MySql>::new("SELECT dedupe_key FROM raw_punch_events WHERE dedupe_key IN (");
    let mut keys = existing_q.separated(", ");
    for punch in chunk {
        keys.push_bind(punch.dedupe_key.clone());
    }
    keys.push_unseparated(")");
    let existing: HashSet<String> = existing_q
        .build_query_scalar::<String>()
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

    let mut qb = QueryBuilder::<MySql>::new(
        "INSERT INTO raw_punch_events \
         (dedupe_key, device_code, device_user_code, machine_id, epoch_ms, occurred_at, \
          verify_type, in_out, user_sn, device_ip, raw_payload) ",
    );
    qb.push_values(chunk, |mut row, p| {
        row.push_bind(p.dedupe_key.clone())
            .push_bind(p.device_code.clone())
            .push_bind(p.device_user_code.clone())
            .push_bind(p.machine_id.clone())
            .push_bind(p.epoch_ms)
            .push_bind(p.occurred_at)
            .push_bind(p.verify_type.clone())
            .push_bind(p.in_out.clone())
            .push_bind(p.user_sn.clone())
            .push_bind(p.device_ip.clone())
            .push_bind(p.raw_payload.clone());
    });
    qb.push(
        " ON DUPLICATE KEY UPDATE \
         machine_id = VALUES(machine_id), \
         user_sn = VALUES(user_sn), \
         device_ip = VALUES(device_ip), \
         raw_payload = VALUES(raw_payload), \
         received_at = CURRENT_TIMESTAMP(3)",
    );
    qb.build().execute(&mut *tx).await?;

    tx.commit().await?;

    let inserted = chunk
        .iter()
        .filter(|p| !existing.contains(&p.dedupe_key))
        .count();
    debug!(size = chunk.len(), inserted, "Ledger chunk committed");
    Ok(inserted)
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct EventFilter {
    pub device_code: Option<String>,
    pub device_user_code: Option<String>,
    /// RFC 3339 instant
    #[param(value_type = String)]
    pub from: Option<DateTime<Utc>>,
    /// RFC 3339 instant
    #[param(value_type = String)]
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct EventListResponse {
    pub data: Vec<RawPunchEvent>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

fn push_event_filter(qb: &mut QueryBuilder<'_, MySql>, filter: &EventFilter) {
    qb.push(" WHERE 1=1");
    if let Some(device) = &filter.device_code {
        qb.push(" AND device_code = ").push_bind(device.clone());
    }
    if let Some(user) = &filter.device_user_code {
        qb.push(" AND device_user_code = ").push_bind(user.clone());
    }
    if let Some(from) = filter.from {
        qb.push(" AND occurred_at >= ").push_bind(from);
    }
    if let Some(to) = filter.to {
        qb.push(" AND occurred_at <= ").push_bind(to);
    }
}

/// Paged view of the raw ledger, newest first.
pub async fn list_events(pool: &MySqlPool, filter: &EventFilter) -> AppResult<EventListResponse> {
    let page = filter.page.unwrap_or(1).max(1);
    let per_page = filter.per_page.unwrap_or(50).clamp(1, 500);
    let offset = (page - 1) * per_page;

    let mut count_q = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM raw_punch_events");
    push_event_filter(&mut count_q, filter);
    let total = count_q.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut data_q = QueryBuilder::<MySql>::new(
        "SELECT id, dedupe_key, device_code, device_user_code, machine_id, epoch_ms, occurred_at, \
         verify_type, in_out, received_at, reconciled_at FROM raw_punch_events",
    );
    push_event_filter(&mut data_q, filter);
    data_q
        .push(" ORDER BY occurred_at DESC, id DESC LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(offset);
    let data = data_q
        .build_query_as::<RawPunchEvent>()
        .fetch_all(pool)
        .await?;

    Ok(EventListResponse {
        data,
        page,
        per_page,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(logs: serde_json::Value) -> IngestRequest {
        serde_json::from_value(json!({
            "deviceCode": "GATE-01",
            "machineId": "ZK-5561",
            "logs": logs,
        }))
        .unwrap()
    }

    #[test]
    fn fingerprint_covers_every_identifying_field() {
        let base = dedupe_key("GATE-01", "1042", 1_000, Some("1"), Some("0"));
        assert_eq!(base, "7:GATE-01|4:1042|1000|1:1|1:0");
        assert_ne!(base, dedupe_key("GATE-01", "1042", 1_000, Some("15"), Some("0")));
        assert_ne!(base, dedupe_key("GATE-01", "1042", 1_000, Some("1"), None));
        assert_ne!(base, dedupe_key("GATE-02", "1042", 1_000, Some("1"), Some("0")));
        assert_ne!(base, dedupe_key("GATE-01", "1042", 1_001, Some("1"), Some("0")));
    }

    #[test]
    fn separator_inside_a_code_does_not_merge_punches() {
        assert_ne!(
            dedupe_key("A|B", "C", 1, None, None),
            dedupe_key("A", "B|C", 1, None, None)
        );
        assert_ne!(
            dedupe_key("A", "B", 1, Some(""), None),
            dedupe_key("A", "B", 1, None, Some(""))
        );
    }

    #[test]
    fn unstorable_logs_are_skipped_without_sinking_the_batch() {
        let req = request(json!([
            { "userCode": "1042", "epochMs": 1772413200000i64 },
            { "userCode": "x".repeat(300), "epochMs": 1772413200000i64 },
            { "userCode": "1043", "epochMs": 1772413200000i64, "verifyType": "v".repeat(21) },
            { "userCode": "1044", "epochMs": 2_500_000_000_000_000i64 },
            { "userCode": "1045", "epochMs": DATETIME_END_MS },
            { "userCode": "1046", "epochMs": DATETIME_END_MS - 1 },
            { "userCode": "1047", "epochMs": 1772413200000i64, "deviceIp": "9".repeat(65) },
        ]));

        let (punches, skipped) = prepare_batch(&req);
        assert_eq!(skipped, 5);
        let users: Vec<&str> = punches.iter().map(|p| p.device_user_code.as_str()).collect();
        assert_eq!(users, ["1042", "1046"]);
        assert_eq!(punches[1].occurred_at.to_rfc3339(), "9999-12-31T23:59:59.999+00:00");
        assert!(punches.iter().all(|p| p.dedupe_key.chars().count() <= DEDUPE_KEY_MAX_CHARS));
    }

    #[test]
    fn incomplete_logs_are_skipped_not_fatal() {
        let req = request(json!([
            { "userCode": "1042", "epochMs": 1772413200000i64 },
            { "epochMs": 1772413200000i64 },
            { "userCode": "1042" },
            { "userCode": "1042", "epochMs": -5 },
            { "userCode": "7", "epochMs": 1772413260000i64, "deviceCode": "GATE-09" },
        ]));

        let (punches, skipped) = prepare_batch(&req);
        assert_eq!(skipped, 3);
        assert_eq!(punches.len(), 2);
        assert_eq!(punches[0].device_code, "GATE-01");
        assert_eq!(punches[0].machine_id.as_deref(), Some("ZK-5561"));
        assert_eq!(punches[1].device_code, "GATE-09");
    }

    #[test]
    fn epoch_is_read_as_utc_instant() {
        let req = request(json!([{ "userCode": "1042", "epochMs": 1772413200123i64 }]));
        let (punches, _) = prepare_batch(&req);
        assert_eq!(punches[0].occurred_at.timestamp_millis(), 1_772_413_200_123);
        assert_eq!(punches[0].occurred_at.to_rfc3339(), "2026-03-02T01:00:00.123+00:00");
    }

    #[test]
    fn redelivered_punches_collapse_with_last_payload_winning() {
        let req = request(json!([
            { "userCode": "1042", "epochMs": 1772413200000i64, "raw": { "attempt": 1 } },
            { "userCode": "1043", "epochMs": 1772413200000i64 },
            { "userCode": "1042", "epochMs": 1772413200000i64, "raw": { "attempt": 2 } },
        ]));

        let (punches, skipped) = prepare_batch(&req);
        assert_eq!(skipped, 0);
        assert_eq!(punches.len(), 2);
        assert_eq!(punches[0].device_user_code, "1042");
        assert_eq!(punches[0].raw_payload.as_deref(), Some(r#"{"attempt":2}"#));
    }

    #[test]
    fn identical_batches_prepare_identically() {
        let logs = json!([
            { "userCode": 1, "epochMs": 1772413200000i64, "verifyType": 1, "inOut": 0 },
            { "userCode": 1, "epochMs": 1772445600000i64, "verifyType": 1, "inOut": 1 },
        ]);
        let (first, _) = prepare_batch(&request(logs.clone()));
        let (second, _) = prepare_batch(&request(logs));
        assert_eq!(first, second);
    }
}
