use std::collections::VecDeque;
use std::sync::Mutex;

use futures::future::BoxFuture;

use crate::notifier::{Notifier, NotifyError};
use crate::sage_client::{
    AdjustmentSubmitter, CostLookup, RemoteError, RemoteErrorKind, SubmissionOutcome,
    SubmissionRequest,
};

/// Replays scripted submission results in order and records every request.
#[derive(Default)]
pub(crate) struct ScriptedSubmitter {
    results: Mutex<VecDeque<Result<SubmissionOutcome, RemoteError>>>,
    requests: Mutex<Vec<SubmissionRequest>>,
}

impl ScriptedSubmitter {
    pub(crate) fn with_results(results: Vec<Result<SubmissionOutcome, RemoteError>>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, result: Result<SubmissionOutcome, RemoteError>) {
        self.results
            .lock()
            .expect("results mutex poisoned")
            .push_back(result);
    }

    pub(crate) fn requests(&self) -> Vec<SubmissionRequest> {
        self.requests.lock().expect("requests mutex poisoned").clone()
    }
}

impl AdjustmentSubmitter for ScriptedSubmitter {
    fn submit<'a>(
        &'a self,
        request: &'a SubmissionRequest,
    ) -> BoxFuture<'a, Result<SubmissionOutcome, RemoteError>> {
        Box::pin(async move {
            self.requests
                .lock()
                .expect("requests mutex poisoned")
                .push(request.clone());

            self.results
                .lock()
                .expect("results mutex poisoned")
                .pop_front()
                .unwrap_or_else(|| {
                    Err(RemoteError::new(
                        RemoteErrorKind::Transport,
                        format!("no scripted submission result for {}", request.stock_code),
                    ))
                })
        })
    }
}

#[derive(Default)]
pub(crate) struct ScriptedCostLookup {
    results: Mutex<VecDeque<Result<Option<f64>, RemoteError>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCostLookup {
    pub(crate) fn with_results(results: Vec<Result<Option<f64>, RemoteError>>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls mutex poisoned").clone()
    }
}

impl CostLookup for ScriptedCostLookup {
    fn lookup_cost<'a>(
        &'a self,
        stock_code: &'a str,
    ) -> BoxFuture<'a, Result<Option<f64>, RemoteError>> {
        Box::pin(async move {
            self.calls
                .lock()
                .expect("calls mutex poisoned")
                .push(stock_code.to_string());

            self.results
                .lock()
                .expect("results mutex poisoned")
                .pop_front()
                .unwrap_or(Ok(None))
        })
    }
}

/// Records alerts. Deliveries fail while `failures_remaining` is non-zero.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    alerts: Mutex<Vec<(String, String)>>,
    failures_remaining: Mutex<u32>,
}

impl RecordingNotifier {
    pub(crate) fn failing_first(failures: u32) -> Self {
        Self {
            alerts: Mutex::new(Vec::new()),
            failures_remaining: Mutex::new(failures),
        }
    }

    pub(crate) fn alerts(&self) -> Vec<(String, String)> {
        self.alerts.lock().expect("alerts mutex poisoned").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify<'a>(
        &'a self,
        stock_code: &'a str,
        error: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            {
                let mut remaining = self
                    .failures_remaining
                    .lock()
                    .expect("failures mutex poisoned");
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(NotifyError::Rejected {
                        status: 503,
                        body: "mail transport unavailable".to_string(),
                    });
                }
            }

            self.alerts
                .lock()
                .expect("alerts mutex poisoned")
                .push((stock_code.to_string(), error.to_string()));
            Ok(())
        })
    }
}
