/// How a processing cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleDisposition {
    /// The global switch is off; nothing was read beyond the stats row.
    Paused,
    QueueEmpty,
    Applied,
    /// HyperSage rejected the adjustment or could not be reached. Counted.
    SubmissionFailed,
    /// The cost lookup failed before any mutation. Not counted.
    CostLookupFailed,
}

impl CycleDisposition {
    pub fn is_failure(self) -> bool {
        matches!(self, Self::SubmissionFailed | Self::CostLookupFailed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Paused => "paused",
            Self::QueueEmpty => "queue_empty",
            Self::Applied => "applied",
            Self::SubmissionFailed => "submission_failed",
            Self::CostLookupFailed => "cost_lookup_failed",
        }
    }
}

/// The single result of one processing cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingOutcome {
    pub disposition: CycleDisposition,
    pub adjustment_id: Option<i64>,
    pub stock_code: Option<String>,
    pub error: Option<String>,
}

impl ProcessingOutcome {
    pub(crate) fn idle(disposition: CycleDisposition) -> Self {
        Self {
            disposition,
            adjustment_id: None,
            stock_code: None,
            error: None,
        }
    }

    pub(crate) fn applied(adjustment_id: i64, stock_code: String) -> Self {
        Self {
            disposition: CycleDisposition::Applied,
            adjustment_id: Some(adjustment_id),
            stock_code: Some(stock_code),
            error: None,
        }
    }

    pub(crate) fn failure(
        disposition: CycleDisposition,
        adjustment_id: i64,
        stock_code: String,
        error: String,
    ) -> Self {
        Self {
            disposition,
            adjustment_id: Some(adjustment_id),
            stock_code: Some(stock_code),
            error: Some(error),
        }
    }

    pub fn failed(&self) -> bool {
        self.disposition.is_failure()
    }
}
