use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

/// Error type for adjustment store operations.
///
/// Every variant is fatal for the current cycle: the store is the source of truth, and the
/// worker does not try to self-heal a broken persistence layer.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database operation failed: {0}")]
    Database(#[from] diesel::result::Error),
    #[error("invalid adjustment type value in database: {0}")]
    InvalidAdjustmentType(String),
    #[error("expected exactly one sagestats row, found {0}")]
    StatsRowCount(usize),
    #[error("store invariant violated: {0}")]
    Invariant(String),
}

/// Direction of a stock adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdjustmentKind {
    In,
    Out,
}

impl AdjustmentKind {
    pub(crate) fn as_db_str(self) -> &'static str {
        match self {
            AdjustmentKind::In => "adj_in",
            AdjustmentKind::Out => "adj_out",
        }
    }

    pub(crate) fn from_db_str(value: &str) -> Result<Self, StoreError> {
        match value {
            "adj_in" => Ok(AdjustmentKind::In),
            "adj_out" => Ok(AdjustmentKind::Out),
            other => Err(StoreError::InvalidAdjustmentType(other.to_string())),
        }
    }

    /// Numeric movement type expected by HyperSage (`1` = in, `2` = out).
    pub fn wire_code(self) -> u8 {
        match self {
            AdjustmentKind::In => 1,
            AdjustmentKind::Out => 2,
        }
    }
}

/// Whether an adjustment has reached Sage yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyState {
    Pending,
    Applied { at: DateTime<Utc> },
}

/// Per-adjustment circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseState {
    Active,
    Paused { since: DateTime<Utc> },
}

/// Operator kill switch stored on the singleton stats row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    Running,
    Paused,
}

/// One requested change to an item's stock level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    pub id: i64,
    pub kind: AdjustmentKind,
    pub quantity: Decimal,
    pub stock_code: String,
    pub reference_text: String,
    pub inserted_at: Option<DateTime<Utc>>,
    pub apply_state: ApplyState,
    pub retry_count: i32,
    pub pause_state: PauseState,
}

impl Adjustment {
    pub fn mark_applied(&mut self, at: DateTime<Utc>) {
        self.apply_state = ApplyState::Applied { at };
    }

    /// Counts one failed attempt. Applied rows keep their retry count frozen.
    pub fn record_failure(&mut self) {
        if self.apply_state == ApplyState::Pending {
            self.retry_count = self.retry_count.saturating_add(1);
        }
    }

    pub fn pause(&mut self, since: DateTime<Utc>) {
        self.pause_state = PauseState::Paused { since };
    }

    pub fn resume(&mut self) {
        self.pause_state = PauseState::Active;
    }
}

/// Singleton counters plus the global pause switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateStats {
    pub total_applied: i64,
    pub total_failures: i64,
    pub queue_state: QueueState,
}

impl AggregateStats {
    pub fn is_paused(&self) -> bool {
        self.queue_state == QueueState::Paused
    }
}

/// Counter increments written alongside one adjustment mutation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsDelta {
    pub applied: i64,
    pub failures: i64,
}

impl StatsDelta {
    pub fn applied() -> Self {
        Self {
            applied: 1,
            failures: 0,
        }
    }

    pub fn failure() -> Self {
        Self {
            applied: 0,
            failures: 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.applied == 0 && self.failures == 0
    }
}
