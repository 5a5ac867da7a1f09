use serde::{Deserialize, Serialize};
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{info, instrument};
use utoipa::{IntoParams, ToSchema};

use crate::error::{AppError, AppResult};
use crate::model::device_mapping::{DevicePair, DeviceUserMapping, UnmappedPair};

const MAX_CODE_LEN: usize = 64;

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpsertMapping {
    #[schema(example = "GATE-01")]
    pub device_code: String,
    #[schema(example = "1042")]
    pub device_user_code: String,
    #[schema(example = 12)]
    pub employee_id: u64,
    pub note: Option<String>,
    /// Defaults to true.
    pub is_active: Option<bool>,
}

/// The stored mapping plus whom the pair pointed at before the write.
#[derive(Debug)]
pub struct MappingChange {
    pub mapping: DeviceUserMapping,
    pub previous_employee_id: Option<u64>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct MappingFilter {
    pub device_code: Option<String>,
    pub employee_id: Option<u64>,
    pub is_active: Option<bool>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct UnmappedFilter {
    pub device_code: Option<String>,
    pub device_user_code: Option<String>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Serialize, ToSchema)]
pub struct MappingListResponse {
    pub data: Vec<DeviceUserMapping>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

#[derive(Serialize, ToSchema)]
pub struct UnmappedListResponse {
    pub data: Vec<UnmappedPair>,
    pub page: u32,
    pub per_page: u32,
    pub total: i64,
}

fn paging(page: Option<u32>, per_page: Option<u32>) -> (u32, u32, u32) {
    let page = page.unwrap_or(1).max(1);
    let per_page = per_page.unwrap_or(20).clamp(1, 100);
    (page, per_page, (page - 1) * per_page)
}

fn clean_code(field: &str, raw: &str) -> AppResult<String> {
    let code = raw.trim();
    if code.is_empty() {
        return Err(AppError::validation(format!("{field} is required")));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(AppError::validation(format!(
            "{field} must be at most {MAX_CODE_LEN} characters"
        )));
    }
    Ok(code.to_string())
}

/// Normalizes a pair coming from a request.
pub fn clean_pair(device_code: &str, device_user_code: &str) -> AppResult<DevicePair> {
    Ok(DevicePair::new(
        clean_code("device_code", device_code)?,
        clean_code("device_user_code", device_user_code)?,
    ))
}

/// Create-or-replace keyed on the pair.
#[instrument(skip(pool, req), fields(device_code = %req.device_code, employee_id = req.employee_id))]
pub async fn upsert_mapping(pool: &MySqlPool, req: &UpsertMapping) -> AppResult<MappingChange> {
    let pair = clean_pair(&req.device_code, &req.device_user_code)?;
    let note = req
        .note
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let employee_exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM employees WHERE id = ?")
        .bind(req.employee_id)
        .fetch_one(pool)
        .await?
        > 0;
    if !employee_exists {
        return Err(AppError::not_found(format!(
            "employee {} does not exist",
            req.employee_id
        )));
    }

    let mut tx = pool.begin().await?;

    let previous_employee_id = sqlx::query_scalar::<_, u64>(
        r#"
        SELECT employee_id FROM device_user_mappings
        WHERE device_code = ? AND device_user_code = ? AND is_active = 1
        FOR UPDATE
        "#,
    )
    .bind(&pair.device_code)
    .bind(&pair.device_user_code)
    .fetch_optional(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO device_user_mappings (device_code, device_user_code, employee_id, is_active, note)
        VALUES (?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            employee_id = VALUES(employee_id),
            is_active = VALUES(is_active),
            note = VALUES(note),
            updated_at = CURRENT_TIMESTAMP(3)
        "#,
    )
    .bind(&pair.device_code)
    .bind(&pair.device_user_code)
    .bind(req.employee_id)
    .bind(req.is_active.unwrap_or(true))
    .bind(note)
    .execute(&mut *tx)
    .await?;

    let mapping = sqlx::query_as::<_, DeviceUserMapping>(
        r#"
        SELECT id, device_code, device_user_code, employee_id, is_active, note, updated_at
        FROM device_user_mappings
        WHERE device_code = ? AND device_user_code = ?
        "#,
    )
    .bind(&pair.device_code)
    .bind(&pair.device_user_code)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;

    info!(
        mapping_id = mapping.id,
        active = mapping.is_active,
        ?previous_employee_id,
        "Device mapping stored"
    );
    Ok(MappingChange {
        mapping,
        previous_employee_id,
    })
}

/// Deletes the binding; returns how many rows went and the employee it pointed at.
#[instrument(skip(pool))]
pub async fn remove_mapping(pool: &MySqlPool, pair: &DevicePair) -> AppResult<(u64, Option<u64>)> {
    let mut tx = pool.begin().await?;

    let employee_id = sqlx::query_scalar::<_, u64>(
        "SELECT employee_id FROM device_user_mappings WHERE device_code = ? AND device_user_code = ? FOR UPDATE",
    )
    .bind(&pair.device_code)
    .bind(&pair.device_user_code)
    .fetch_optional(&mut *tx)
    .await?;

    let removed = sqlx::query(
        "DELETE FROM device_user_mappings WHERE device_code = ? AND device_user_code = ?",
    )
    .bind(&pair.device_code)
    .bind(&pair.device_user_code)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    tx.commit().await?;
    Ok((removed, employee_id))
}

fn push_mapping_filter(qb: &mut QueryBuilder<'_, MySql>, filter: &MappingFilter) {
    qb.push(" WHERE 1=1");
    if let Some(device) = &filter.device_code {
        qb.push(" AND device_code = ").push_bind(device.clone());
    }
    if let Some(employee_id) = filter.employee_id {
        qb.push(" AND employee_id = ").push_bind(employee_id);
    }
    if let Some(active) = filter.is_active {
        qb.push(" AND is_active = ").push_bind(active);
    }
}

pub async fn list_mappings(pool: &MySqlPool, filter: &MappingFilter) -> AppResult<MappingListResponse> {
    let (page, per_page, offset) = paging(filter.page, filter.per_page);

    let mut count_q = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM device_user_mappings");
    push_mapping_filter(&mut count_q, filter);
    let total = count_q.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut data_q = QueryBuilder::<MySql>::new(
        "SELECT id, device_code, device_user_code, employee_id, is_active, note, updated_at \
         FROM device_user_mappings",
    );
    push_mapping_filter(&mut data_q, filter);
    data_q
        .push(" ORDER BY device_code, device_user_code LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(offset);
    let data = data_q
        .build_query_as::<DeviceUserMapping>()
        .fetch_all(pool)
        .await?;

    Ok(MappingListResponse {
        data,
        page,
        per_page,
        total,
    })
}

fn push_unmapped_from(qb: &mut QueryBuilder<'_, MySql>, filter: &UnmappedFilter) {
    qb.push(
        " FROM raw_punch_events e \
         LEFT JOIN device_user_mappings m \
           ON m.device_code = e.device_code \
          AND m.device_user_code = e.device_user_code \
          AND m.is_active = 1 \
         WHERE m.id IS NULL",
    );
    if let Some(device) = &filter.device_code {
        qb.push(" AND e.device_code = ").push_bind(device.clone());
    }
    if let Some(user) = &filter.device_user_code {
        qb.push(" AND e.device_user_code = ").push_bind(user.clone());
    }
    qb.push(" GROUP BY e.device_code, e.device_user_code");
}

/// Pairs present in the ledger without an active mapping, most recently seen first.
pub async fn list_unmapped(pool: &MySqlPool, filter: &UnmappedFilter) -> AppResult<UnmappedListResponse> {
    let (page, per_page, offset) = paging(filter.page, filter.per_page);

    let mut count_q = QueryBuilder::<MySql>::new("SELECT COUNT(*) FROM (SELECT 1");
    push_unmapped_from(&mut count_q, filter);
    count_q.push(") pairs");
    let total = count_q.build_query_scalar::<i64>().fetch_one(pool).await?;

    let mut data_q = QueryBuilder::<MySql>::new(
        "SELECT e.device_code, e.device_user_code, COUNT(*) AS event_count, \
         MIN(e.occurred_at) AS first_seen, MAX(e.occurred_at) AS last_seen",
    );
    push_unmapped_from(&mut data_q, filter);
    data_q
        .push(" ORDER BY last_seen DESC LIMIT ")
        .push_bind(per_page)
        .push(" OFFSET ")
        .push_bind(offset);
    let data = data_q
        .build_query_as::<UnmappedPair>()
        .fetch_all(pool)
        .await?;

    Ok(UnmappedListResponse {
        data,
        page,
        per_page,
        total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_trimmed_and_required() {
        let pair = clean_pair("  GATE-01 ", "1042\n").unwrap();
        assert_eq!(pair, DevicePair::new("GATE-01", "1042"));

        assert!(matches!(clean_pair("", "1"), Err(AppError::Validation(_))));
        assert!(matches!(clean_pair("GATE-01", "   "), Err(AppError::Validation(_))));
        assert!(clean_pair(&"X".repeat(65), "1").is_err());
    }

    #[test]
    fn paging_is_clamped() {
        assert_eq!(paging(None, None), (1, 20, 0));
        assert_eq!(paging(Some(0), Some(1000)), (1, 100, 0));
        assert_eq!(paging(Some(3), Some(10)), (3, 10, 20));
    }
}
