//! Clients for the two remote halves of Sage: the SData commodities feed (cost lookup) and
//! HyperSage (adjustment submission).
//!
//! Both are reached through small traits so the processor can be exercised against scripted
//! doubles without network access.

mod cost_lookup;
mod error;
mod reference;
mod submission;

use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::BoxFuture;
use rust_decimal::Decimal;

use crate::adjustment_store::AdjustmentKind;

pub use cost_lookup::SageCostClient;
pub use error::{RemoteError, RemoteErrorKind};
pub use reference::map_reference;
pub use submission::{HyperSageClient, DESYNC_WARNING};

/// Everything HyperSage needs to book one adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionRequest {
    pub kind: AdjustmentKind,
    pub quantity: Decimal,
    pub stock_code: String,
    pub date: NaiveDate,
    /// Short reason code, already passed through [`map_reference`].
    pub reference_code: String,
    pub cost: Option<f64>,
}

/// Business-level answer from HyperSage. Transport failures are a [`RemoteError`] instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Applied,
    Rejected { message: String },
}

/// Looks up the cost price of one stock item.
pub trait CostLookup: Send + Sync {
    fn lookup_cost<'a>(
        &'a self,
        stock_code: &'a str,
    ) -> BoxFuture<'a, Result<Option<f64>, RemoteError>>;
}

impl<T> CostLookup for Arc<T>
where
    T: CostLookup + ?Sized,
{
    fn lookup_cost<'a>(
        &'a self,
        stock_code: &'a str,
    ) -> BoxFuture<'a, Result<Option<f64>, RemoteError>> {
        (**self).lookup_cost(stock_code)
    }
}

impl CostLookup for SageCostClient {
    fn lookup_cost<'a>(
        &'a self,
        stock_code: &'a str,
    ) -> BoxFuture<'a, Result<Option<f64>, RemoteError>> {
        Box::pin(SageCostClient::lookup_cost(self, stock_code))
    }
}

/// Submits one adjustment to the ledger.
pub trait AdjustmentSubmitter: Send + Sync {
    fn submit<'a>(
        &'a self,
        request: &'a SubmissionRequest,
    ) -> BoxFuture<'a, Result<SubmissionOutcome, RemoteError>>;
}

impl<T> AdjustmentSubmitter for Arc<T>
where
    T: AdjustmentSubmitter + ?Sized,
{
    fn submit<'a>(
        &'a self,
        request: &'a SubmissionRequest,
    ) -> BoxFuture<'a, Result<SubmissionOutcome, RemoteError>> {
        (**self).submit(request)
    }
}

impl AdjustmentSubmitter for HyperSageClient {
    fn submit<'a>(
        &'a self,
        request: &'a SubmissionRequest,
    ) -> BoxFuture<'a, Result<SubmissionOutcome, RemoteError>> {
        Box::pin(HyperSageClient::submit(self, request))
    }
}
