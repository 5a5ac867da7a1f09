use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use sqlx::{MySql, MySqlPool, QueryBuilder};
use tracing::{debug, error, info, instrument, warn};
use utoipa::ToSchema;

use crate::config::EngineSettings;
use crate::error::{AppError, AppResult};
use crate::model::attendance::RecordSource;
use crate::model::device_mapping::DevicePair;
use crate::model::schedule::PlannedSchedule;
use crate::service::classify::{Classification, classify};
use crate::service::window::{MatchTolerance, ShiftWindow, local_date, resolve_window};

const IN_LIST_CHUNK: usize = 500;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileSummary {
    /// Ledger events read by this run.
    pub scanned: usize,
    /// Events attributed to a planned shift of a mapped employee.
    pub matched: usize,
    pub records_updated: usize,
    /// Events whose timestamp could not be interpreted.
    pub skipped: usize,
    /// Employee-days (or employees) whose processing failed.
    pub failed: usize,
    /// The batch limit was reached; another call will find more work.
    pub has_more: bool,
}

impl ReconcileSummary {
    /// Adds the counters of a follow-up run.
    pub fn combine(&mut self, other: ReconcileSummary) {
        self.scanned += other.scanned;
        self.matched += other.matched;
        self.records_updated += other.records_updated;
        self.skipped += other.skipped;
        self.failed += other.failed;
        self.has_more |= other.has_more;
    }

    fn absorb(&mut self, other: &EmployeeOutcome) {
        self.matched += other.matched;
        self.records_updated += other.records_updated;
        self.failed += other.failed;
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LedgerRow {
    id: u64,
    device_code: String,
    device_user_code: String,
    epoch_ms: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerPunch {
    pub id: u64,
    pub pair: DevicePair,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct EmployeeOutcome {
    matched: usize,
    records_updated: usize,
    failed: usize,
    /// Punches whose unit was written (or that belong to no plan) and can be marked reconciled.
    settled: Vec<u64>,
}

/// Converts rows to punches, dropping rows whose epoch is out of range.
fn to_punches(rows: Vec<LedgerRow>) -> (Vec<LedgerPunch>, usize) {
    let mut skipped = 0;
    let punches = rows
        .into_iter()
        .filter_map(|row| match DateTime::from_timestamp_millis(row.epoch_ms) {
            Some(at) => Some(LedgerPunch {
                id: row.id,
                pair: DevicePair::new(row.device_code, row.device_user_code),
                at,
            }),
            None => {
                warn!(event_id = row.id, epoch_ms = row.epoch_ms, "Skipping ledger event with unusable timestamp");
                skipped += 1;
                None
            }
        })
        .collect();
    (punches, skipped)
}

/// Groups punches by the employee their pair is actively mapped to.
///
/// Punches from unmapped pairs are dropped here and never reach a record.
pub fn group_by_employee(
    punches: Vec<LedgerPunch>,
    mappings: &HashMap<DevicePair, u64>,
) -> BTreeMap<u64, Vec<LedgerPunch>> {
    let mut grouped: BTreeMap<u64, Vec<LedgerPunch>> = BTreeMap::new();
    for punch in punches {
        if let Some(employee_id) = mappings.get(&punch.pair) {
            grouped.entry(*employee_id).or_default().push(punch);
        }
    }
    grouped
}

/// Planned date a punch belongs to, if any.
///
/// Candidates are the previous, same and next local day. A candidate qualifies when
/// its capture window contains the punch; among those the shift nearest to the punch
/// wins, ties going to the earlier date.
pub fn attribute(
    at: DateTime<Utc>,
    settings: &EngineSettings,
    windows: &BTreeMap<NaiveDate, ShiftWindow>,
) -> Option<NaiveDate> {
    let local = local_date(at, settings.timezone);
    [local.pred_opt(), Some(local), local.succ_opt()]
        .into_iter()
        .flatten()
        .filter_map(|date| windows.get(&date).map(|w| (date, w)))
        .filter(|(_, w)| w.captures(at, &settings.tolerance))
        .min_by_key(|(date, w)| (w.distance(at), *date))
        .map(|(date, _)| date)
}

/// Resolves the window of every plan, skipping plans whose times cannot be placed.
pub fn plan_windows(
    plans: &BTreeMap<NaiveDate, PlannedSchedule>,
    settings: &EngineSettings,
) -> BTreeMap<NaiveDate, ShiftWindow> {
    plans
        .iter()
        .filter_map(|(date, plan)| {
            match resolve_window(*date, plan.planned_start, plan.planned_end, settings.timezone) {
                Ok(w) => Some((*date, w)),
                Err(e) => {
                    warn!(schedule_id = plan.id, error = %e, "Planned shift has no usable window");
                    None
                }
            }
        })
        .collect()
}

/// Classifies one planned day from the punches attributed to it.
pub fn classify_unit(
    date: NaiveDate,
    plan: &PlannedSchedule,
    windows: &BTreeMap<NaiveDate, ShiftWindow>,
    settings: &EngineSettings,
    candidates: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> Option<Classification> {
    let window = windows.get(&date)?;
    let own: Vec<DateTime<Utc>> = candidates
        .iter()
        .copied()
        .filter(|at| attribute(*at, settings, windows) == Some(date))
        .collect();
    Some(classify(window, &plan.policy(), &settings.tolerance, &own, now))
}

/// Reconciles the oldest unreconciled events of actively mapped pairs.
#[instrument(skip(pool, settings))]
pub async fn reconcile_pending(
    pool: &MySqlPool,
    settings: &EngineSettings,
    batch_size: u32,
    now: DateTime<Utc>,
) -> AppResult<ReconcileSummary> {
    let batch_size = batch_size.max(1);

    let rows = sqlx::query_as::<_, LedgerRow>(
        r#"
        SELECT e.id, e.device_code, e.device_user_code, e.epoch_ms
        FROM raw_punch_events e
        JOIN device_user_mappings m
          ON m.device_code = e.device_code
         AND m.device_user_code = e.device_user_code
         AND m.is_active = 1
        WHERE e.reconciled_at IS NULL
        ORDER BY e.occurred_at, e.id
        LIMIT ?
        "#,
    )
    .bind(batch_size)
    .fetch_all(pool)
    .await?;

    let has_more = rows.len() as u32 == batch_size;
    let mut summary = run(pool, settings, rows, now).await?;
    summary.has_more = has_more;

    info!(?summary, "Pending reconciliation finished");
    Ok(summary)
}

/// Reconciles events in `[from, to]`, optionally limited to some device pairs.
#[instrument(skip(pool, settings, pairs), fields(pair_count = pairs.map_or(0, |p| p.len())))]
pub async fn reconcile_range(
    pool: &MySqlPool,
    settings: &EngineSettings,
    pairs: Option<&[DevicePair]>,
    from: DateTime<Utc>,
    to: DateTime<Utc>,
    batch_size: u32,
    now: DateTime<Utc>,
) -> AppResult<ReconcileSummary> {
    if from > to {
        return Err(AppError::validation("from must not be after to"));
    }
    if pairs.is_some_and(|p| p.is_empty()) {
        return Ok(ReconcileSummary::default());
    }
    let batch_size = batch_size.max(1);

    let mut qb = QueryBuilder::<MySql>::new(
        "SELECT id, device_code, device_user_code, epoch_ms FROM raw_punch_events WHERE occurred_at BETWEEN ",
    );
    qb.push_bind(from).push(" AND ").push_bind(to);
    if let Some(pairs) = pairs {
        qb.push(" AND ");
        push_pair_filter(&mut qb, pairs);
    }
    qb.push(" ORDER BY occurred_at, id LIMIT ").push_bind(batch_size);

    let rows = qb.build_query_as::<LedgerRow>().fetch_all(pool).await?;

    let has_more = rows.len() as u32 == batch_size;
    let mut summary = run(pool, settings, rows, now).await?;
    summary.has_more = has_more;

    info!(?summary, "Range reconciliation finished");
    Ok(summary)
}

/// Recomputes every planned day of one employee in `[from, to]`, punched or not.
///
/// Used after a schedule assignment or after device identities moved away from the
/// employee, when there may be no ledger event left to trigger the unit.
#[instrument(skip(pool, settings))]
pub async fn recompute_days(
    pool: &MySqlPool,
    settings: &EngineSettings,
    employee_id: u64,
    from: NaiveDate,
    to: NaiveDate,
    now: DateTime<Utc>,
) -> AppResult<ReconcileSummary> {
    if from > to {
        return Err(AppError::validation("from must not be after to"));
    }

    let plans = load_plans(pool, employee_id, from - Duration::days(1), to + Duration::days(1)).await?;
    let windows = plan_windows(&plans, settings);
    let pairs = pairs_for_employee(pool, employee_id).await?;

    let mut summary = ReconcileSummary::default();
    for (date, plan) in plans.range(from..=to) {
        let Some(window) = windows.get(date) else {
            summary.failed += 1;
            continue;
        };
        match reconcile_unit(pool, settings, employee_id, *date, plan, window, &windows, &pairs, now).await {
            Ok(true) => summary.records_updated += 1,
            Ok(false) => {}
            Err(e) => {
                error!(employee_id, %date, error = %e, "Failed to recompute employee-day");
                summary.failed += 1;
            }
        }
    }

    info!(?summary, "Employee days recomputed");
    Ok(summary)
}

/// Active device pairs of one employee.
pub async fn pairs_for_employee(pool: &MySqlPool, employee_id: u64) -> AppResult<Vec<DevicePair>> {
    let rows = sqlx::query_as::<_, (String, String)>(
        r#"
        SELECT device_code, device_user_code
        FROM device_user_mappings
        WHERE employee_id = ? AND is_active = 1
        "#,
    )
    .bind(employee_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|(device, user)| DevicePair::new(device, user))
        .collect())
}

fn push_pair_filter(qb: &mut QueryBuilder<'_, MySql>, pairs: &[DevicePair]) {
    qb.push("(device_code, device_user_code) IN (");
    for (i, pair) in pairs.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push("(")
            .push_bind(pair.device_code.clone())
            .push(", ")
            .push_bind(pair.device_user_code.clone())
            .push(")");
    }
    qb.push(")");
}

async fn run(
    pool: &MySqlPool,
    settings: &EngineSettings,
    rows: Vec<LedgerRow>,
    now: DateTime<Utc>,
) -> AppResult<ReconcileSummary> {
    let mut summary = ReconcileSummary {
        scanned: rows.len(),
        ..Default::default()
    };

    let (punches, skipped) = to_punches(rows);
    summary.skipped = skipped;

    let seen: Vec<DevicePair> = punches
        .iter()
        .map(|p| p.pair.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let mappings = load_active_mappings(pool, &seen).await?;

    for (employee_id, punches) in group_by_employee(punches, &mappings) {
        match reconcile_employee(pool, settings, employee_id, &punches, now).await {
            Ok(outcome) => {
                summary.absorb(&outcome);
                if let Err(e) = mark_reconciled(pool, &outcome.settled, now).await {
                    error!(employee_id, error = %e, "Failed to mark events reconciled");
                }
            }
            Err(e) => {
                error!(employee_id, error = %e, "Reconciliation failed for employee");
                summary.failed += 1;
            }
        }
    }

    Ok(summary)
}

async fn reconcile_employee(
    pool: &MySqlPool,
    settings: &EngineSettings,
    employee_id: u64,
    punches: &[LedgerPunch],
    now: DateTime<Utc>,
) -> AppResult<EmployeeOutcome> {
    let mut outcome = EmployeeOutcome::default();

    let dates: BTreeSet<NaiveDate> = punches
        .iter()
        .map(|p| local_date(p.at, settings.timezone))
        .collect();
    let (Some(first), Some(last)) = (dates.first(), dates.last()) else {
        return Ok(outcome);
    };

    let plans = load_plans(
        pool,
        employee_id,
        *first - Duration::days(2),
        *last + Duration::days(2),
    )
    .await?;
    let windows = plan_windows(&plans, settings);

    let mut units: BTreeMap<NaiveDate, Vec<u64>> = BTreeMap::new();
    for punch in punches {
        match attribute(punch.at, settings, &windows) {
            Some(date) => units.entry(date).or_default().push(punch.id),
            // no plan for this punch: it stays in the ledger as evidence only
            None => outcome.settled.push(punch.id),
        }
    }

    let pairs = pairs_for_employee(pool, employee_id).await?;

    for (date, ids) in units {
        outcome.matched += ids.len();
        let (Some(plan), Some(window)) = (plans.get(&date), windows.get(&date)) else {
            continue;
        };

        match reconcile_unit(pool, settings, employee_id, date, plan, window, &windows, &pairs, now).await {
            Ok(written) => {
                if written {
                    outcome.records_updated += 1;
                }
                outcome.settled.extend(ids);
            }
            Err(e) => {
                error!(employee_id, %date, error = %e, "Failed to reconcile employee-day");
                outcome.failed += 1;
            }
        }
    }

    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn reconcile_unit(
    pool: &MySqlPool,
    settings: &EngineSettings,
    employee_id: u64,
    date: NaiveDate,
    plan: &PlannedSchedule,
    window: &ShiftWindow,
    windows: &BTreeMap<NaiveDate, ShiftWindow>,
    pairs: &[DevicePair],
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let candidates = load_punch_times(pool, pairs, window, &settings.tolerance).await?;

    let Some(classification) = classify_unit(date, plan, windows, settings, &candidates, now) else {
        return Ok(false);
    };

    debug!(employee_id, %date, status = %classification.status, "Classified employee-day");
    write_record(pool, employee_id, date, plan.id, &classification, now).await
}

async fn load_active_mappings(
    pool: &MySqlPool,
    pairs: &[DevicePair],
) -> AppResult<HashMap<DevicePair, u64>> {
    let mut mappings = HashMap::new();

    for chunk in pairs.chunks(IN_LIST_CHUNK) {
        let mut qb = QueryBuilder::<MySql>::new(
            "SELECT device_code, device_user_code, employee_id FROM device_user_mappings WHERE is_active = 1 AND ",
        );
        push_pair_filter(&mut qb, chunk);

        let rows = qb
            .build_query_as::<(String, String, u64)>()
            .fetch_all(pool)
            .await?;
        for (device, user, employee_id) in rows {
            mappings.insert(DevicePair::new(device, user), employee_id);
        }
    }

    Ok(mappings)
}

async fn load_plans(
    pool: &MySqlPool,
    employee_id: u64,
    from: NaiveDate,
    to: NaiveDate,
) -> AppResult<BTreeMap<NaiveDate, PlannedSchedule>> {
    let plans = sqlx::query_as::<_, PlannedSchedule>(
        r#"
        SELECT id, employee_id, date, shift_id, planned_name, planned_start, planned_end,
               planned_break_minutes, late_grace_minutes, early_grace_minutes,
               overtime_threshold_minutes
        FROM planned_schedules
        WHERE employee_id = ? AND date BETWEEN ? AND ?
        "#,
    )
    .bind(employee_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await?;

    Ok(plans.into_iter().map(|p| (p.date, p)).collect())
}

/// Every ledger punch of the employee's pairs inside the window's capture range.
async fn load_punch_times(
    pool: &MySqlPool,
    pairs: &[DevicePair],
    window: &ShiftWindow,
    tolerance: &MatchTolerance,
) -> AppResult<Vec<DateTime<Utc>>> {
    if pairs.is_empty() {
        return Ok(Vec::new());
    }
    let (from, to) = window.capture(tolerance);

    let mut qb = QueryBuilder::<MySql>::new(
        "SELECT id, device_code, device_user_code, epoch_ms FROM raw_punch_events WHERE occurred_at BETWEEN ",
    );
    qb.push_bind(from).push(" AND ").push_bind(to).push(" AND ");
    push_pair_filter(&mut qb, pairs);

    let rows = qb.build_query_as::<LedgerRow>().fetch_all(pool).await?;
    let (punches, _) = to_punches(rows);
    Ok(punches.into_iter().map(|p| p.at).collect())
}

/// Upserts the employee-day. Records corrected by hand are left alone.
async fn write_record(
    pool: &MySqlPool,
    employee_id: u64,
    date: NaiveDate,
    schedule_id: u64,
    c: &Classification,
    now: DateTime<Utc>,
) -> AppResult<bool> {
    let mut tx = pool.begin().await?;

    let existing = sqlx::query_scalar::<_, String>(
        "SELECT source FROM attendance_records WHERE employee_id = ? AND date = ? FOR UPDATE",
    )
    .bind(employee_id)
    .bind(date)
    .fetch_optional(&mut *tx)
    .await?;

    if existing.as_deref() == Some(RecordSource::Manual.as_str()) {
        tx.commit().await?;
        debug!(employee_id, %date, "Skipping manually corrected record");
        return Ok(false);
    }

    sqlx::query(
        r#"
        INSERT INTO attendance_records
            (employee_id, date, schedule_id, check_in_at, check_out_at,
             check_in_status, check_out_status, status,
             late_minutes, early_leave_minutes, overtime_minutes, work_minutes,
             source, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON DUPLICATE KEY UPDATE
            schedule_id = VALUES(schedule_id),
            check_in_at = VALUES(check_in_at),
            check_out_at = VALUES(check_out_at),
            check_in_status = VALUES(check_in_status),
            check_out_status = VALUES(check_out_status),
            status = VALUES(status),
            late_minutes = VALUES(late_minutes),
            early_leave_minutes = VALUES(early_leave_minutes),
            overtime_minutes = VALUES(overtime_minutes),
            work_minutes = VALUES(work_minutes),
            source = VALUES(source),
            updated_at = VALUES(updated_at)
        "#,
    )
    .bind(employee_id)
    .bind(date)
    .bind(schedule_id)
    .bind(c.check_in_at)
    .bind(c.check_out_at)
    .bind(c.check_in_status.as_str())
    .bind(c.check_out_status.as_str())
    .bind(c.status.as_str())
    .bind(c.late_minutes)
    .bind(c.early_leave_minutes)
    .bind(c.overtime_minutes)
    .bind(c.work_minutes)
    .bind(RecordSource::Device.as_str())
    .bind(now)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

async fn mark_reconciled(pool: &MySqlPool, ids: &[u64], now: DateTime<Utc>) -> AppResult<()> {
    for chunk in ids.chunks(IN_LIST_CHUNK) {
        let mut qb = QueryBuilder::<MySql>::new("UPDATE raw_punch_events SET reconciled_at = ");
        qb.push_bind(now).push(" WHERE id IN (");
        let mut list = qb.separated(", ");
        for id in chunk {
            list.push_bind(*id);
        }
        list.push_unseparated(")");
        qb.build().execute(pool).await?;
    }
    Ok(())
}
