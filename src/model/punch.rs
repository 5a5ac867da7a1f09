use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

/// One punch as stored in the ledger.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct RawPunchEvent {
    pub id: u64,
    pub dedupe_key: String,
    pub device_code: String,
    pub device_user_code: String,
    pub machine_id: Option<String>,
    pub epoch_ms: i64,
    #[schema(value_type = String, format = "date-time")]
    pub occurred_at: DateTime<Utc>,
    pub verify_type: Option<String>,
    pub in_out: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub received_at: DateTime<Utc>,
    #[schema(value_type = String, format = "date-time", nullable = true)]
    pub reconciled_at: Option<DateTime<Utc>>,
}

/// Validated punch ready for the ledger upsert.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRawPunch {
    pub dedupe_key: String,
    pub device_code: String,
    pub device_user_code: String,
    pub machine_id: Option<String>,
    pub epoch_ms: i64,
    pub occurred_at: DateTime<Utc>,
    pub verify_type: Option<String>,
    pub in_out: Option<String>,
    pub user_sn: Option<String>,
    pub device_ip: Option<String>,
    pub raw_payload: Option<String>,
}

/// Batch pushed by a device agent.
#[derive(Debug, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    #[schema(example = "GATE-01")]
    pub device_code: String,
    #[schema(example = "ZK-5561")]
    pub machine_id: Option<String>,
    #[serde(default)]
    pub logs: Vec<DeviceLog>,
}

/// Device agents are inconsistent about numeric vs string fields, so both are accepted.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DeviceLog {
    pub device_code: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    #[schema(value_type = String, example = "1042")]
    pub user_code: Option<String>,
    #[serde(default, deserialize_with = "epoch_millis")]
    #[schema(value_type = i64, example = 1760850000000i64)]
    pub epoch_ms: Option<i64>,
    #[serde(default, deserialize_with = "string_or_number")]
    #[schema(value_type = String, nullable = true)]
    pub verify_type: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    #[schema(value_type = String, nullable = true)]
    pub in_out: Option<String>,
    #[schema(value_type = Object, nullable = true)]
    pub raw: Option<Value>,
    #[serde(default, deserialize_with = "string_or_number")]
    #[schema(value_type = String, nullable = true)]
    pub user_sn: Option<String>,
    pub device_ip: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct IngestSummary {
    pub received: usize,
    pub inserted: usize,
    pub skipped: usize,
    /// Events that belonged to chunks whose transaction failed.
    pub failed: usize,
}

fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn epoch_millis<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_log_accepts_numbers_and_strings() {
        let log: DeviceLog = serde_json::from_value(serde_json::json!({
            "userCode": 1042,
            "epochMs": "1760850000000",
            "verifyType": 1,
            "inOut": "0"
        }))
        .unwrap();

        assert_eq!(log.user_code.as_deref(), Some("1042"));
        assert_eq!(log.epoch_ms, Some(1_760_850_000_000));
        assert_eq!(log.verify_type.as_deref(), Some("1"));
        assert_eq!(log.in_out.as_deref(), Some("0"));
    }

    #[test]
    fn blank_or_garbage_fields_become_none() {
        let log: DeviceLog = serde_json::from_value(serde_json::json!({
            "userCode": "  ",
            "epochMs": "yesterday"
        }))
        .unwrap();

        assert!(log.user_code.is_none());
        assert!(log.epoch_ms.is_none());
    }
}
