use chrono::{DateTime, Local, Utc};
use diesel_async::scoped_futures::ScopedFutureExt;
use tracing::{debug, info, warn};

use super::types::{CycleDisposition, ProcessingOutcome};
use crate::adjustment_store::{
    fetch_aggregate_stats, fetch_next_eligible, resume_cooled_down_adjustments, save_adjustment,
    save_stats_delta, Adjustment, AdjustmentDb, StatsDelta, StoreError,
};
use crate::config::PausePolicy;
use crate::sage_client::{
    map_reference, AdjustmentSubmitter, CostLookup, SubmissionOutcome, SubmissionRequest,
};

/// Runs one processing cycle: take the earliest eligible adjustment, book it in Sage, and
/// record the result.
///
/// Remote failures are folded into the returned [`ProcessingOutcome`]; only store failures
/// surface as errors.
pub struct AdjustmentProcessor<L, S> {
    /// `None` when cost lookup is disabled for this deployment.
    cost_lookup: Option<L>,
    submitter: S,
    pause_policy: PausePolicy,
}

impl<L, S> AdjustmentProcessor<L, S>
where
    L: CostLookup,
    S: AdjustmentSubmitter,
{
    pub fn new(cost_lookup: Option<L>, submitter: S, pause_policy: PausePolicy) -> Self {
        Self {
            cost_lookup,
            submitter,
            pause_policy,
        }
    }

    /// Runs one cycle inside a single transaction.
    ///
    /// The stats read, adjustment read, and both writes commit together or not at all.
    pub async fn run_cycle<C>(
        &self,
        conn: &mut C,
        now: DateTime<Utc>,
    ) -> Result<ProcessingOutcome, StoreError>
    where
        C: AdjustmentDb,
    {
        conn.transaction(|conn| async move { self.cycle_in_tx(conn, now).await }.scope_boxed())
            .await
    }

    async fn cycle_in_tx<C>(
        &self,
        conn: &mut C,
        now: DateTime<Utc>,
    ) -> Result<ProcessingOutcome, StoreError>
    where
        C: AdjustmentDb,
    {
        let stats = fetch_aggregate_stats(conn).await?;
        if stats.is_paused() {
            debug!(event = "sync_paused", "global pause is set, skipping cycle");
            return Ok(ProcessingOutcome::idle(CycleDisposition::Paused));
        }

        if self.pause_policy.pause_on_alert {
            self.resume_cooled_down(conn, now).await?;
        }

        let Some(mut adjustment) = fetch_next_eligible(conn).await? else {
            debug!(event = "queue_empty", "no pending adjustments");
            return Ok(ProcessingOutcome::idle(CycleDisposition::QueueEmpty));
        };

        let cost = match self.lookup_cost(&adjustment).await {
            Ok(cost) => cost,
            Err(outcome) => return Ok(outcome),
        };

        let request = SubmissionRequest {
            kind: adjustment.kind,
            quantity: adjustment.quantity,
            stock_code: adjustment.stock_code.clone(),
            date: now.with_timezone(&Local).date_naive(),
            reference_code: map_reference(&adjustment.reference_text).trim().to_string(),
            cost,
        };

        let failure = match self.submitter.submit(&request).await {
            Ok(SubmissionOutcome::Applied) => None,
            Ok(SubmissionOutcome::Rejected { message }) => Some(message),
            Err(err) => Some(err.to_string()),
        };

        match failure {
            None => {
                adjustment.mark_applied(now);
                save_adjustment(conn, &adjustment).await?;
                save_stats_delta(conn, StatsDelta::applied()).await?;
                info!(
                    event = "adjustment_applied",
                    adjustment_id = adjustment.id,
                    stock_code = %adjustment.stock_code,
                    adjustment_type = adjustment.kind.as_db_str(),
                    quantity = %adjustment.quantity,
                    "adjustment applied in Sage"
                );
                Ok(ProcessingOutcome::applied(adjustment.id, adjustment.stock_code))
            }
            Some(error) => {
                adjustment.record_failure();
                save_adjustment(conn, &adjustment).await?;
                save_stats_delta(conn, StatsDelta::failure()).await?;
                warn!(
                    event = "adjustment_failed",
                    adjustment_id = adjustment.id,
                    stock_code = %adjustment.stock_code,
                    adjustment_type = adjustment.kind.as_db_str(),
                    retry_count = adjustment.retry_count,
                    error = %error,
                    "adjustment was not applied in Sage"
                );
                Ok(ProcessingOutcome::failure(
                    CycleDisposition::SubmissionFailed,
                    adjustment.id,
                    adjustment.stock_code,
                    error,
                ))
            }
        }
    }

    /// Looks up the cost price when enabled. A failure ends the cycle without touching counters.
    async fn lookup_cost(&self, adjustment: &Adjustment) -> Result<Option<f64>, ProcessingOutcome> {
        let Some(cost_lookup) = &self.cost_lookup else {
            return Ok(None);
        };

        match cost_lookup.lookup_cost(&adjustment.stock_code).await {
            Ok(cost) => Ok(cost),
            Err(err) => {
                warn!(
                    event = "cost_lookup_failed",
                    adjustment_id = adjustment.id,
                    stock_code = %adjustment.stock_code,
                    error = %err,
                    "could not look up cost price"
                );
                Err(ProcessingOutcome::failure(
                    CycleDisposition::CostLookupFailed,
                    adjustment.id,
                    adjustment.stock_code.clone(),
                    err.to_string(),
                ))
            }
        }
    }

    async fn resume_cooled_down<C>(&self, conn: &mut C, now: DateTime<Utc>) -> Result<(), StoreError>
    where
        C: AdjustmentDb,
    {
        let cool_down =
            chrono::Duration::from_std(self.pause_policy.cool_down).unwrap_or(chrono::Duration::MAX);
        for adjustment in resume_cooled_down_adjustments(conn, cool_down, now).await? {
            info!(
                event = "adjustment_resumed",
                adjustment_id = adjustment.id,
                stock_code = %adjustment.stock_code,
                "pause cool-down elapsed, adjustment is eligible again"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::TimeZone;
    use rust_decimal::Decimal;

    use super::*;
    use crate::adjustment_store::{
        fetch_adjustment, set_queue_paused, AdjustmentKind, ApplyState, PauseState,
    };
    use crate::db::sqlite_test::{
        insert_adjustment, insert_paused_adjustment, seed_stats, setup_in_memory_sqlite_async,
        TestConnection,
    };
    use crate::sage_client::{RemoteError, RemoteErrorKind};
    use crate::sync_service::test_support::{ScriptedCostLookup, ScriptedSubmitter};

    fn at(seconds: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(seconds, 0).single().expect("valid timestamp")
    }

    fn no_pause() -> PausePolicy {
        PausePolicy {
            pause_on_alert: false,
            cool_down: Duration::from_secs(3600),
        }
    }

    type TestProcessor = AdjustmentProcessor<Arc<ScriptedCostLookup>, Arc<ScriptedSubmitter>>;

    fn processor(submitter: &Arc<ScriptedSubmitter>) -> TestProcessor {
        AdjustmentProcessor::new(None, Arc::clone(submitter), no_pause())
    }

    fn processor_with_lookup(
        lookup: &Arc<ScriptedCostLookup>,
        submitter: &Arc<ScriptedSubmitter>,
        policy: PausePolicy,
    ) -> TestProcessor {
        AdjustmentProcessor::new(Some(Arc::clone(lookup)), Arc::clone(submitter), policy)
    }

    async fn totals(conn: &mut TestConnection) -> (i64, i64) {
        let stats = fetch_aggregate_stats(conn).await.expect("stats should load");
        (stats.total_applied, stats.total_failures)
    }

    async fn load(conn: &mut TestConnection, id: i64) -> Adjustment {
        fetch_adjustment(conn, id)
            .await
            .expect("fetch should succeed")
            .expect("adjustment should exist")
    }

    #[tokio::test]
    async fn applied_submission_marks_row_and_counts_once() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, false).await;
        insert_adjustment(&mut conn, 1, "adj_in", "4.5", "LW00001", "CFA").await;

        let submitter = Arc::new(ScriptedSubmitter::with_results(vec![Ok(SubmissionOutcome::Applied)]));
        let outcome = processor(&submitter)
            .run_cycle(&mut conn, at(1_700_000_000))
            .await
            .expect("cycle should succeed");

        assert_eq!(outcome.disposition, CycleDisposition::Applied);
        assert!(!outcome.failed());
        assert_eq!(outcome.adjustment_id, Some(1));

        let adjustment = load(&mut conn, 1).await;
        assert_eq!(
            adjustment.apply_state,
            ApplyState::Applied {
                at: at(1_700_000_000)
            }
        );
        assert_eq!(adjustment.retry_count, 0);
        assert_eq!(totals(&mut conn).await, (1, 0));

        let requests = submitter.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].kind, AdjustmentKind::In);
        assert_eq!(requests[0].quantity, Decimal::new(45, 1));
        assert_eq!(requests[0].reference_code, "C");
        assert_eq!(requests[0].cost, None);
    }

    #[tokio::test]
    async fn padded_reference_is_sent_trimmed_but_not_mapped() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, false).await;
        insert_adjustment(&mut conn, 1, "adj_in", "1", "LW00001", " CFA ").await;
        insert_adjustment(&mut conn, 2, "adj_in", "1", "LW00002", "Free text ").await;

        let submitter = Arc::new(ScriptedSubmitter::with_results(vec![
            Ok(SubmissionOutcome::Applied),
            Ok(SubmissionOutcome::Applied),
        ]));
        let processor = processor(&submitter);
        for secs in [1_700_000_000, 1_700_000_060] {
            processor
                .run_cycle(&mut conn, at(secs))
                .await
                .expect("cycle should succeed");
        }

        let requests = submitter.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].reference_code, "CFA");
        assert_eq!(requests[1].reference_code, "Free text");
    }

    #[tokio::test]
    async fn rejected_submission_counts_failure_and_keeps_message() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, false).await;
        insert_adjustment(&mut conn, 1, "adj_out", "2", "LW00001", "Sampling").await;

        let submitter = Arc::new(ScriptedSubmitter::with_results(vec![Ok(SubmissionOutcome::Rejected {
            message: "error 409 from HyperSage, message: duplicate".to_string(),
        })]));
        let outcome = processor(&submitter)
            .run_cycle(&mut conn, at(1_700_000_000))
            .await
            .expect("cycle should succeed");

        assert!(outcome.failed());
        assert_eq!(outcome.disposition, CycleDisposition::SubmissionFailed);
        assert_eq!(outcome.stock_code.as_deref(), Some("LW00001"));
        assert!(outcome
            .error
            .as_deref()
            .is_some_and(|error| error.contains("duplicate")));

        let adjustment = load(&mut conn, 1).await;
        assert_eq!(adjustment.apply_state, ApplyState::Pending);
        assert_eq!(adjustment.retry_count, 1);
        assert_eq!(totals(&mut conn).await, (0, 1));
    }

    #[tokio::test]
    async fn transport_error_is_captured_as_failure() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, false).await;
        insert_adjustment(&mut conn, 1, "adj_in", "1", "LW00001", "Measurement").await;

        let submitter = Arc::new(ScriptedSubmitter::with_results(vec![Err(RemoteError::new(
            RemoteErrorKind::Timeout,
            "Timed out adding an adjustment in to Sage",
        ))]));
        let outcome = processor(&submitter)
            .run_cycle(&mut conn, at(1_700_000_000))
            .await
            .expect("remote errors never fail the cycle");

        assert_eq!(outcome.disposition, CycleDisposition::SubmissionFailed);
        assert_eq!(
            outcome.error.as_deref(),
            Some("Timed out adding an adjustment in to Sage")
        );
        assert_eq!(load(&mut conn, 1).await.retry_count, 1);
        assert_eq!(totals(&mut conn).await, (0, 1));
    }

    #[tokio::test]
    async fn empty_queue_is_not_a_failure_and_writes_nothing() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, false).await;

        let submitter = Arc::new(ScriptedSubmitter::default());
        let outcome = processor(&submitter)
            .run_cycle(&mut conn, at(1_700_000_000))
            .await
            .expect("cycle should succeed");

        assert_eq!(outcome, ProcessingOutcome::idle(CycleDisposition::QueueEmpty));
        assert!(submitter.requests().is_empty());
        assert_eq!(totals(&mut conn).await, (0, 0));
    }

    #[tokio::test]
    async fn global_pause_skips_fetch_and_submit() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, true).await;
        insert_adjustment(&mut conn, 1, "adj_in", "1", "LW00001", "CFA").await;

        let submitter = Arc::new(ScriptedSubmitter::with_results(vec![Ok(SubmissionOutcome::Applied)]));
        let outcome = processor(&submitter)
            .run_cycle(&mut conn, at(1_700_000_000))
            .await
            .expect("cycle should succeed");

        assert_eq!(outcome, ProcessingOutcome::idle(CycleDisposition::Paused));
        assert!(submitter.requests().is_empty());
        assert_eq!(load(&mut conn, 1).await.apply_state, ApplyState::Pending);
    }

    #[tokio::test]
    async fn missing_stats_row_is_a_store_error() {
        let mut conn = setup_in_memory_sqlite_async().await;
        insert_adjustment(&mut conn, 1, "adj_in", "1", "LW00001", "CFA").await;

        let submitter = Arc::new(ScriptedSubmitter::default());
        let err = processor(&submitter)
            .run_cycle(&mut conn, at(1_700_000_000))
            .await
            .expect_err("a missing stats row must fail the cycle");

        assert!(matches!(err, StoreError::StatsRowCount(0)), "got {err:?}");
    }

    #[tokio::test]
    async fn cost_lookup_failure_is_not_counted() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, false).await;
        insert_adjustment(&mut conn, 7, "adj_in", "1", "LW00007", "CFA").await;

        let lookup = Arc::new(ScriptedCostLookup::with_results(vec![Err(RemoteError::new(
            RemoteErrorKind::Status(500),
            "Sage returned an error status of: (500) Internal Server Error",
        ))]));
        let submitter = Arc::new(ScriptedSubmitter::default());
        let outcome = processor_with_lookup(&lookup, &submitter, no_pause())
            .run_cycle(&mut conn, at(1_700_000_000))
            .await
            .expect("cycle should succeed");

        assert!(outcome.failed());
        assert_eq!(outcome.disposition, CycleDisposition::CostLookupFailed);
        assert_eq!(outcome.adjustment_id, Some(7));
        assert!(submitter.requests().is_empty());
        assert_eq!(load(&mut conn, 7).await.retry_count, 0);
        assert_eq!(totals(&mut conn).await, (0, 0));
    }

    #[tokio::test]
    async fn looked_up_cost_is_submitted() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, false).await;
        insert_adjustment(&mut conn, 1, "adj_in", "1", "LW00001", "Adjustments").await;

        let lookup = Arc::new(ScriptedCostLookup::with_results(vec![Ok(Some(12.5))]));
        let submitter = Arc::new(ScriptedSubmitter::with_results(vec![Ok(SubmissionOutcome::Applied)]));
        processor_with_lookup(&lookup, &submitter, no_pause())
            .run_cycle(&mut conn, at(1_700_000_000))
            .await
            .expect("cycle should succeed");

        assert_eq!(lookup.calls(), vec!["LW00001".to_string()]);
        let requests = submitter.requests();
        assert_eq!(requests[0].cost, Some(12.5));
        assert_eq!(requests[0].reference_code, "ADJ");
    }

    #[tokio::test]
    async fn each_processed_cycle_moves_totals_by_exactly_one() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, false).await;
        for id in 1..=4 {
            insert_adjustment(&mut conn, id, "adj_in", "1", &format!("LW0000{id}"), "CFA").await;
        }

        let submitter = Arc::new(ScriptedSubmitter::with_results(vec![
            Ok(SubmissionOutcome::Applied),
            Ok(SubmissionOutcome::Rejected {
                message: "no".to_string(),
            }),
            Err(RemoteError::new(RemoteErrorKind::Connect, "refused")),
            Ok(SubmissionOutcome::Applied),
        ]));
        let processor = processor(&submitter);

        let mut previous = 0;
        for _ in 0..4 {
            processor
                .run_cycle(&mut conn, at(1_700_000_000))
                .await
                .expect("cycle should succeed");
            let (applied, failures) = totals(&mut conn).await;
            assert_eq!(applied + failures, previous + 1);
            previous = applied + failures;
        }

        // The rejected row is still first in line, so it is retried before row 3.
        let first = load(&mut conn, 1).await;
        let second = load(&mut conn, 2).await;
        assert!(matches!(first.apply_state, ApplyState::Applied { .. }));
        assert_eq!(second.retry_count, 2);
        assert!(matches!(second.apply_state, ApplyState::Applied { .. }));
    }

    #[tokio::test]
    async fn cool_down_sweep_runs_only_with_pause_policy() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, false).await;
        insert_paused_adjustment(&mut conn, 3, "LW00003", at(1_700_000_000)).await;

        let submitter = Arc::new(ScriptedSubmitter::with_results(vec![Ok(SubmissionOutcome::Applied)]));
        let outcome = processor(&submitter)
            .run_cycle(&mut conn, at(1_800_000_000))
            .await
            .expect("cycle should succeed");
        assert_eq!(outcome.disposition, CycleDisposition::QueueEmpty);
        assert!(matches!(
            load(&mut conn, 3).await.pause_state,
            PauseState::Paused { .. }
        ));

        let policy = PausePolicy {
            pause_on_alert: true,
            cool_down: Duration::from_secs(600),
        };
        let outcome = AdjustmentProcessor::new(None::<Arc<ScriptedCostLookup>>, Arc::clone(&submitter), policy)
            .run_cycle(&mut conn, at(1_700_000_600))
            .await
            .expect("cycle should succeed");

        assert_eq!(outcome.disposition, CycleDisposition::Applied);
        assert_eq!(outcome.adjustment_id, Some(3));
        assert_eq!(load(&mut conn, 3).await.pause_state, PauseState::Active);
    }

    #[tokio::test]
    async fn global_pause_blocks_resume_sweep() {
        let mut conn = setup_in_memory_sqlite_async().await;
        seed_stats(&mut conn, false).await;
        insert_paused_adjustment(&mut conn, 3, "LW00003", at(1_700_000_000)).await;
        set_queue_paused(&mut conn, true)
            .await
            .expect("pausing should succeed");

        let policy = PausePolicy {
            pause_on_alert: true,
            cool_down: Duration::from_secs(1),
        };
        let submitter = Arc::new(ScriptedSubmitter::default());
        AdjustmentProcessor::new(None::<Arc<ScriptedCostLookup>>, Arc::clone(&submitter), policy)
            .run_cycle(&mut conn, at(1_800_000_000))
            .await
            .expect("cycle should succeed");

        assert!(matches!(
            load(&mut conn, 3).await.pause_state,
            PauseState::Paused { .. }
        ));
    }
}
