use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// A (device, device-local user) identity as reported by clocking hardware.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
pub struct DevicePair {
    #[schema(example = "GATE-01")]
    pub device_code: String,
    #[schema(example = "1042")]
    pub device_user_code: String,
}

impl DevicePair {
    pub fn new(device_code: impl Into<String>, device_user_code: impl Into<String>) -> Self {
        Self {
            device_code: device_code.into(),
            device_user_code: device_user_code.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct DeviceUserMapping {
    pub id: u64,
    pub device_code: String,
    pub device_user_code: String,
    pub employee_id: u64,
    pub is_active: bool,
    pub note: Option<String>,
    #[schema(value_type = String, format = "date-time")]
    pub updated_at: DateTime<Utc>,
}

impl DeviceUserMapping {
    pub fn pair(&self) -> DevicePair {
        DevicePair::new(self.device_code.clone(), self.device_user_code.clone())
    }
}

/// A pair seen in the ledger with no active mapping.
#[derive(Debug, Clone, Serialize, sqlx::FromRow, ToSchema)]
pub struct UnmappedPair {
    pub device_code: String,
    pub device_user_code: String,
    pub event_count: i64,
    #[schema(value_type = String, format = "date-time", nullable = true)]
    pub first_seen: Option<DateTime<Utc>>,
    #[schema(value_type = String, format = "date-time", nullable = true)]
    pub last_seen: Option<DateTime<Utc>>,
}
