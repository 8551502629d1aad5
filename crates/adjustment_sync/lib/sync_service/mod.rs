//! The processing cycle and the loop that drives it.
//!
//! [`AdjustmentProcessor`] owns one cycle and its transaction. [`SyncService`] repeats cycles on
//! a fixed interval, tracks the failure streak, and raises the alert when it grows too long.

mod error;
mod processor;
mod streak;
#[cfg(test)]
pub(crate) mod test_support;
pub mod types;

use std::time::Duration;

use chrono::{DateTime, Utc};
use diesel_async::scoped_futures::ScopedFutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

pub use error::Error;
pub use processor::AdjustmentProcessor;
pub use streak::{FailureStreak, StreakAction};
use types::ProcessingOutcome;

use crate::adjustment_store::{pause_adjustment, AdjustmentDb, StoreError};
use crate::config::{PausePolicy, SyncConfig};
use crate::db::DbPool;
use crate::notifier::Notifier;
use crate::sage_client::{AdjustmentSubmitter, CostLookup};
use crate::server::monitoring::SYNC_METRICS;

pub struct SyncService<L, S, N> {
    processor: AdjustmentProcessor<L, S>,
    notifier: N,
    streak: FailureStreak,
    interval: Duration,
    pause_policy: PausePolicy,
}

impl<L, S, N> SyncService<L, S, N>
where
    L: CostLookup,
    S: AdjustmentSubmitter,
    N: Notifier,
{
    pub fn new(processor: AdjustmentProcessor<L, S>, notifier: N, config: &SyncConfig) -> Self {
        Self {
            processor,
            notifier,
            streak: FailureStreak::new(config.max_consecutive_failures),
            interval: config.interval,
            pause_policy: config.pause_policy,
        }
    }

    /// Runs cycles until `shutdown` is cancelled. A cycle in progress always completes.
    ///
    /// Returns early with the first store or pool error.
    pub async fn run(mut self, pool: DbPool, shutdown: CancellationToken) -> Result<(), Error> {
        info!(
            event = "sync_loop_started",
            interval_secs = self.interval.as_secs(),
            "adjustment sync loop started"
        );

        while !shutdown.is_cancelled() {
            self.run_once(&pool).await?;

            tokio::select! {
                _ = shutdown.cancelled() => {}
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!(event = "sync_loop_stopped", "adjustment sync loop stopped");
        Ok(())
    }

    /// Checks out a pooled connection and runs a single cycle on it.
    pub async fn run_once(&mut self, pool: &DbPool) -> Result<ProcessingOutcome, Error> {
        let mut conn = pool.get().await?;
        let outcome = self.tick(&mut *conn, Utc::now()).await?;
        Ok(outcome)
    }

    /// One cycle plus the streak bookkeeping that follows it.
    pub async fn tick<C>(
        &mut self,
        conn: &mut C,
        now: DateTime<Utc>,
    ) -> Result<ProcessingOutcome, StoreError>
    where
        C: AdjustmentDb,
    {
        let outcome = self.processor.run_cycle(conn, now).await?;
        if let Some(metrics) = SYNC_METRICS.get() {
            metrics.record_cycle(outcome.disposition);
        }

        match self.streak.record(outcome.failed()) {
            StreakAction::Reset | StreakAction::Continue { .. } => {}
            StreakAction::Alert { consecutive } => {
                self.raise_alert(&outcome, consecutive).await;
                self.pause_offender(conn, &outcome, now).await?;
            }
        }

        if let Some(metrics) = SYNC_METRICS.get() {
            metrics
                .consecutive_failures
                .set(i64::from(self.streak.consecutive()));
        }
        Ok(outcome)
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.streak.consecutive()
    }

    async fn raise_alert(&mut self, outcome: &ProcessingOutcome, consecutive: u32) {
        let stock_code = outcome.stock_code.as_deref().unwrap_or_default();
        let last_error = outcome.error.as_deref().unwrap_or_default();

        match self.notifier.notify(stock_code, last_error).await {
            Ok(()) => {
                self.streak.alert_delivered();
                if let Some(metrics) = SYNC_METRICS.get() {
                    metrics.alerts_sent_total.inc();
                }
                warn!(
                    event = "failure_alert_sent",
                    stock_code,
                    consecutive_failures = consecutive,
                    last_error,
                    "consecutive failure threshold exceeded, alert sent"
                );
            }
            Err(err) => {
                error!(
                    event = "failure_alert_failed",
                    stock_code,
                    consecutive_failures = consecutive,
                    error = %err,
                    "could not deliver failure alert, will retry on the next failure"
                );
            }
        }
    }

    /// Pauses the adjustment whose failure raised the alert so the queue can move on.
    async fn pause_offender<C>(
        &self,
        conn: &mut C,
        outcome: &ProcessingOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>
    where
        C: AdjustmentDb,
    {
        if !self.pause_policy.pause_on_alert {
            return Ok(());
        }
        let Some(adjustment_id) = outcome.adjustment_id else {
            return Ok(());
        };

        let paused = conn
            .transaction(|conn| {
                async move { pause_adjustment(conn, adjustment_id, now).await }.scope_boxed()
            })
            .await?;
        if paused {
            warn!(
                event = "adjustment_paused",
                adjustment_id,
                stock_code = outcome.stock_code.as_deref().unwrap_or_default(),
                cool_down_secs = self.pause_policy.cool_down.as_secs(),
                "paused failing adjustment"
            );
        }
        Ok(())
    }
}
