use chrono::{DateTime, Utc};
use diesel::result::QueryResult;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Bool, Integer, Nullable, Text};
use diesel::sqlite::SqliteConnection;
use diesel::QueryableByName;
use diesel_async::pg::AsyncPgConnection;
use diesel_async::sync_connection_wrapper::SyncConnectionWrapper;
use diesel_async::{AsyncConnection, RunQueryDsl};
use futures::future::BoxFuture;
use rust_decimal::Decimal;
use std::str::FromStr;

use super::types::{
    Adjustment, AdjustmentKind, AggregateStats, ApplyState, PauseState, QueueState, StoreError,
};

/// SQL flavour differences between the production Postgres store and the SQLite test store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// Expression reading a `TIMESTAMP` column as UTC unix seconds.
    pub(crate) fn epoch_seconds(self, column: &str) -> String {
        match self {
            Dialect::Postgres => format!("CAST(EXTRACT(EPOCH FROM {column}) AS BIGINT)"),
            Dialect::Sqlite => format!("CAST(strftime('%s', {column}) AS INTEGER)"),
        }
    }

    /// Literal writing a UTC instant into a `TIMESTAMP` column.
    pub(crate) fn timestamp(self, at: DateTime<Utc>) -> String {
        let seconds = at.timestamp();
        match self {
            Dialect::Postgres => format!("(to_timestamp({seconds}) AT TIME ZONE 'UTC')"),
            Dialect::Sqlite => format!("datetime({seconds}, 'unixepoch')"),
        }
    }

    /// Row-lock suffix for claiming the next eligible adjustment inside a cycle transaction.
    ///
    /// SQLite serializes writers at the database level, so it needs no row lock.
    pub(crate) fn claim_suffix(self) -> &'static str {
        match self {
            Dialect::Postgres => " FOR UPDATE SKIP LOCKED",
            Dialect::Sqlite => "",
        }
    }
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct AdjustmentRow {
    #[diesel(sql_type = BigInt)]
    pub id: i64,
    #[diesel(sql_type = Text)]
    pub adjustment_type: String,
    #[diesel(sql_type = Text)]
    pub amount: String,
    #[diesel(sql_type = Text)]
    pub stock_code: String,
    #[diesel(sql_type = Text)]
    pub reference_text: String,
    #[diesel(sql_type = Bool)]
    pub sage_updated: bool,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub inserted_at: Option<i64>,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub sage_updated_at: Option<i64>,
    #[diesel(sql_type = Integer)]
    pub num_retries: i32,
    #[diesel(sql_type = Bool)]
    pub updates_paused: bool,
    #[diesel(sql_type = Nullable<BigInt>)]
    pub paused_time: Option<i64>,
}

#[doc(hidden)]
#[derive(Debug, QueryableByName)]
#[diesel(check_for_backend(diesel::pg::Pg, diesel::sqlite::Sqlite))]
pub struct StatsRow {
    #[diesel(sql_type = BigInt)]
    pub total_updated: i64,
    #[diesel(sql_type = BigInt)]
    pub total_failures: i64,
    #[diesel(sql_type = Bool)]
    pub paused: bool,
}

/// Connection seam for the adjustment store.
///
/// Store operations are plain SQL so the same code runs against Postgres in production and an
/// in-memory SQLite database in tests; only [`Dialect`] fragments differ.
#[doc(hidden)]
pub trait AdjustmentDb: AsyncConnection + Send {
    const DIALECT: Dialect;

    fn execute_sql<'a>(&'a mut self, sql: String) -> BoxFuture<'a, QueryResult<usize>>;
    fn load_adjustments<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, QueryResult<Vec<AdjustmentRow>>>;
    fn load_stats<'a>(&'a mut self, sql: String) -> BoxFuture<'a, QueryResult<Vec<StatsRow>>>;
}

impl AdjustmentDb for AsyncPgConnection {
    const DIALECT: Dialect = Dialect::Postgres;

    fn execute_sql<'a>(&'a mut self, sql: String) -> BoxFuture<'a, QueryResult<usize>> {
        Box::pin(async move { sql_query(sql).execute(self).await })
    }

    fn load_adjustments<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, QueryResult<Vec<AdjustmentRow>>> {
        Box::pin(async move { sql_query(sql).load::<AdjustmentRow>(self).await })
    }

    fn load_stats<'a>(&'a mut self, sql: String) -> BoxFuture<'a, QueryResult<Vec<StatsRow>>> {
        Box::pin(async move { sql_query(sql).load::<StatsRow>(self).await })
    }
}

impl AdjustmentDb for SyncConnectionWrapper<SqliteConnection> {
    const DIALECT: Dialect = Dialect::Sqlite;

    fn execute_sql<'a>(&'a mut self, sql: String) -> BoxFuture<'a, QueryResult<usize>> {
        Box::pin(async move { sql_query(sql).execute(self).await })
    }

    fn load_adjustments<'a>(
        &'a mut self,
        sql: String,
    ) -> BoxFuture<'a, QueryResult<Vec<AdjustmentRow>>> {
        Box::pin(async move { sql_query(sql).load::<AdjustmentRow>(self).await })
    }

    fn load_stats<'a>(&'a mut self, sql: String) -> BoxFuture<'a, QueryResult<Vec<StatsRow>>> {
        Box::pin(async move { sql_query(sql).load::<StatsRow>(self).await })
    }
}

/// Select list shared by every adjustment query.
pub(crate) fn adjustment_columns(dialect: Dialect) -> String {
    format!(
        "CAST(id AS BIGINT) AS id, adjustment_type, CAST(amount AS TEXT) AS amount, stock_code, \
         COALESCE(reference_text, '') AS reference_text, \
         COALESCE(sage_updated, FALSE) AS sage_updated, \
         {} AS inserted_at, {} AS sage_updated_at, \
         CAST(COALESCE(num_retries, 0) AS INTEGER) AS num_retries, \
         COALESCE(updates_paused, FALSE) AS updates_paused, {} AS paused_time",
        dialect.epoch_seconds("inserted_at"),
        dialect.epoch_seconds("sage_updated_at"),
        dialect.epoch_seconds("paused_time"),
    )
}

pub(crate) fn map_adjustment_row(row: AdjustmentRow) -> Result<Adjustment, StoreError> {
    let kind = AdjustmentKind::from_db_str(&row.adjustment_type)?;
    let quantity = Decimal::from_str(row.amount.trim()).map_err(|err| {
        StoreError::Invariant(format!(
            "adjustment {} has unparsable amount {:?}: {err}",
            row.id, row.amount
        ))
    })?;
    if quantity.is_sign_negative() && !quantity.is_zero() {
        return Err(StoreError::Invariant(format!(
            "adjustment {} has negative amount {quantity}",
            row.id
        )));
    }

    let apply_state = if row.sage_updated {
        let at = row
            .sage_updated_at
            .and_then(from_epoch_seconds)
            .ok_or_else(|| {
                StoreError::Invariant(format!(
                    "adjustment {} is applied but has no sage_updated_at",
                    row.id
                ))
            })?;
        ApplyState::Applied { at }
    } else {
        ApplyState::Pending
    };

    let pause_state = if row.updates_paused {
        let since = row.paused_time.and_then(from_epoch_seconds).ok_or_else(|| {
            StoreError::Invariant(format!(
                "adjustment {} is paused but has no paused_time",
                row.id
            ))
        })?;
        PauseState::Paused { since }
    } else {
        PauseState::Active
    };

    Ok(Adjustment {
        id: row.id,
        kind,
        quantity,
        stock_code: row.stock_code,
        reference_text: row.reference_text,
        inserted_at: row.inserted_at.and_then(from_epoch_seconds),
        apply_state,
        retry_count: row.num_retries,
        pause_state,
    })
}

pub(crate) fn map_stats_rows(mut rows: Vec<StatsRow>) -> Result<AggregateStats, StoreError> {
    if rows.len() != 1 {
        return Err(StoreError::StatsRowCount(rows.len()));
    }
    let Some(row) = rows.pop() else {
        return Err(StoreError::StatsRowCount(0));
    };

    Ok(AggregateStats {
        total_applied: row.total_updated,
        total_failures: row.total_failures,
        queue_state: if row.paused {
            QueueState::Paused
        } else {
            QueueState::Running
        },
    })
}

pub(crate) fn sql_bool(value: bool) -> &'static str {
    if value {
        "TRUE"
    } else {
        "FALSE"
    }
}

fn from_epoch_seconds(seconds: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(seconds, 0)
}
