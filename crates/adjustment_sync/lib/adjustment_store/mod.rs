//! Persistence for the adjustment queue and the singleton `sagestats` row.
//!
//! Every operation takes a connection rather than a pool so the caller owns the transaction
//! boundary: one processing cycle reads and writes through a single transaction.
//!
//! Queries are hand-written SQL shared by Postgres (production) and SQLite (tests). The
//! [`Dialect`] hook covers the few places where the two differ: timestamp conversion and the
//! row lock used to claim work.

mod ops;
mod store;
mod types;

pub use ops::{
    fetch_adjustment, fetch_aggregate_stats, fetch_next_eligible, fetch_paused_adjustments,
    pause_adjustment, resume_cooled_down_adjustments, save_adjustment, save_stats_delta,
    set_queue_paused,
};
pub use store::{AdjustmentDb, Dialect};
pub use types::{
    Adjustment, AdjustmentKind, AggregateStats, ApplyState, PauseState, QueueState, StatsDelta,
    StoreError,
};
