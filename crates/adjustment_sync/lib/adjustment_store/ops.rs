use chrono::{DateTime, Duration, Utc};

use super::store::{adjustment_columns, map_adjustment_row, map_stats_rows, sql_bool, AdjustmentDb};
use super::types::{Adjustment, AggregateStats, ApplyState, PauseState, StatsDelta, StoreError};

/// Reads the singleton stats row.
///
/// Fails with [`StoreError::StatsRowCount`] unless exactly one row exists.
pub async fn fetch_aggregate_stats<C>(conn: &mut C) -> Result<AggregateStats, StoreError>
where
    C: AdjustmentDb,
{
    let rows = conn
        .load_stats(
            "SELECT CAST(COALESCE(total_updated, 0) AS BIGINT) AS total_updated, \
             CAST(COALESCE(total_failures, 0) AS BIGINT) AS total_failures, \
             COALESCE(paused, FALSE) AS paused \
             FROM sagestats"
                .to_string(),
        )
        .await?;
    map_stats_rows(rows)
}

/// Returns the earliest adjustment that is neither applied nor paused.
///
/// On Postgres the row stays locked (`SKIP LOCKED`) until the surrounding transaction ends, so a
/// second worker running the same query picks the next row instead.
pub async fn fetch_next_eligible<C>(conn: &mut C) -> Result<Option<Adjustment>, StoreError>
where
    C: AdjustmentDb,
{
    let sql = format!(
        "SELECT {} FROM adjustments \
         WHERE COALESCE(sage_updated, FALSE) = FALSE AND COALESCE(updates_paused, FALSE) = FALSE \
         ORDER BY id ASC \
         LIMIT 1{}",
        adjustment_columns(C::DIALECT),
        C::DIALECT.claim_suffix(),
    );

    let mut rows = conn.load_adjustments(sql).await?;
    match rows.pop() {
        Some(row) => Ok(Some(map_adjustment_row(row)?)),
        None => Ok(None),
    }
}

/// Lists every individually paused adjustment, oldest first.
pub async fn fetch_paused_adjustments<C>(conn: &mut C) -> Result<Vec<Adjustment>, StoreError>
where
    C: AdjustmentDb,
{
    let sql = format!(
        "SELECT {} FROM adjustments \
         WHERE COALESCE(updates_paused, FALSE) = TRUE \
         ORDER BY id ASC",
        adjustment_columns(C::DIALECT),
    );

    conn.load_adjustments(sql)
        .await?
        .into_iter()
        .map(map_adjustment_row)
        .collect()
}

/// Reads one adjustment by id, if present.
pub async fn fetch_adjustment<C>(conn: &mut C, id: i64) -> Result<Option<Adjustment>, StoreError>
where
    C: AdjustmentDb,
{
    let sql = format!(
        "SELECT {} FROM adjustments WHERE id = {id} LIMIT 1",
        adjustment_columns(C::DIALECT),
    );

    let mut rows = conn.load_adjustments(sql).await?;
    match rows.pop() {
        Some(row) => Ok(Some(map_adjustment_row(row)?)),
        None => Ok(None),
    }
}

/// Persists the mutable lifecycle columns of one adjustment.
///
/// Timestamp columns are only written when the matching state carries a value, so rows whose
/// schema marks them `NOT NULL` keep their previous contents.
pub async fn save_adjustment<C>(conn: &mut C, adjustment: &Adjustment) -> Result<(), StoreError>
where
    C: AdjustmentDb,
{
    let dialect = C::DIALECT;
    let mut assignments = vec![format!("num_retries = {}", adjustment.retry_count)];

    match adjustment.apply_state {
        ApplyState::Pending => assignments.push("sage_updated = FALSE".to_string()),
        ApplyState::Applied { at } => {
            assignments.push("sage_updated = TRUE".to_string());
            assignments.push(format!("sage_updated_at = {}", dialect.timestamp(at)));
        }
    }

    match adjustment.pause_state {
        PauseState::Active => assignments.push("updates_paused = FALSE".to_string()),
        PauseState::Paused { since } => {
            assignments.push("updates_paused = TRUE".to_string());
            assignments.push(format!("paused_time = {}", dialect.timestamp(since)));
        }
    }

    let sql = format!(
        "UPDATE adjustments SET {} WHERE id = {}",
        assignments.join(", "),
        adjustment.id
    );
    let updated = conn.execute_sql(sql).await?;
    if updated != 1 {
        return Err(StoreError::Invariant(format!(
            "expected to update adjustment {}, touched {updated} rows",
            adjustment.id
        )));
    }

    Ok(())
}

/// Adds `delta` to the singleton counters.
///
/// Increments are applied in SQL rather than by writing back a previously read value, so two
/// workers committing at once never lose a count.
pub async fn save_stats_delta<C>(conn: &mut C, delta: StatsDelta) -> Result<(), StoreError>
where
    C: AdjustmentDb,
{
    if delta.is_empty() {
        return Ok(());
    }

    let sql = format!(
        "UPDATE sagestats SET total_updated = total_updated + {}, total_failures = total_failures + {}",
        delta.applied, delta.failures
    );
    let updated = conn.execute_sql(sql).await?;
    if updated != 1 {
        return Err(StoreError::StatsRowCount(updated));
    }

    Ok(())
}

/// Sets or clears the operator kill switch.
pub async fn set_queue_paused<C>(conn: &mut C, paused: bool) -> Result<(), StoreError>
where
    C: AdjustmentDb,
{
    let sql = format!("UPDATE sagestats SET paused = {}", sql_bool(paused));
    let updated = conn.execute_sql(sql).await?;
    if updated != 1 {
        return Err(StoreError::StatsRowCount(updated));
    }
    Ok(())
}

/// Pauses one adjustment so the queue can move past it.
///
/// Returns `false` when the adjustment no longer exists or was already applied.
pub async fn pause_adjustment<C>(
    conn: &mut C,
    id: i64,
    now: DateTime<Utc>,
) -> Result<bool, StoreError>
where
    C: AdjustmentDb,
{
    let Some(mut adjustment) = fetch_adjustment(conn, id).await? else {
        return Ok(false);
    };
    if adjustment.apply_state != ApplyState::Pending {
        return Ok(false);
    }

    adjustment.pause(now);
    save_adjustment(conn, &adjustment).await?;
    Ok(true)
}

/// Clears the pause flag on every adjustment paused for at least `cool_down`.
///
/// Returns the adjustments that were resumed.
pub async fn resume_cooled_down_adjustments<C>(
    conn: &mut C,
    cool_down: Duration,
    now: DateTime<Utc>,
) -> Result<Vec<Adjustment>, StoreError>
where
    C: AdjustmentDb,
{
    let mut resumed = Vec::new();
    for mut adjustment in fetch_paused_adjustments(conn).await? {
        let PauseState::Paused { since } = adjustment.pause_state else {
            continue;
        };
        if now.signed_duration_since(since) < cool_down {
            continue;
        }

        adjustment.resume();
        save_adjustment(conn, &adjustment).await?;
        resumed.push(adjustment);
    }

    Ok(resumed)
}
