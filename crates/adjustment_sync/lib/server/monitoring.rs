use crate::build_info;
use crate::sync_service::types::CycleDisposition;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::{counter::Counter, gauge::Gauge};
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Registers immutable build metadata for `/metrics` scraping.
///
/// We encode this as a labeled gauge with value `1` so the metric is valid for
/// Prometheus text exposition format and still carries stable build labels.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "adjustment_sync",
            version: build_info::VERSION,
            commit: build_info::short_commit_hash(),
        })
        .set(1);
    let sub_registry = registry.sub_registry_with_prefix(prefix);
    sub_registry.register(
        "build_info",
        "Build identity labels for this process",
        build_info_metric,
    );
}

/// Label set for immutable build identity exported on the `worker_build_info` metric.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct CycleLabels {
    pub outcome: &'static str,
}

#[derive(Clone)]
pub struct SyncMetrics {
    /// Completed processing cycles, labelled by how they ended.
    pub cycles_total: Family<CycleLabels, Counter>,
    pub applied_total: Counter,
    /// Counted submission failures (rejections and transport errors).
    pub failures_total: Counter,
    /// Cost lookup failures. These never reach the stored failure counter.
    pub cost_lookup_failures_total: Counter,
    pub alerts_sent_total: Counter,
    /// Length of the current failure streak.
    pub consecutive_failures: Gauge,
}

impl SyncMetrics {
    fn init() -> Self {
        Self {
            cycles_total: Family::default(),
            applied_total: Counter::default(),
            failures_total: Counter::default(),
            cost_lookup_failures_total: Counter::default(),
            alerts_sent_total: Counter::default(),
            consecutive_failures: Gauge::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "cycles",
            "Total number of processing cycles by outcome",
            metrics.cycles_total.clone(),
        );
        sub_registry.register(
            "applied",
            "Total number of adjustments applied in Sage",
            metrics.applied_total.clone(),
        );
        sub_registry.register(
            "failures",
            "Total number of counted adjustment submission failures",
            metrics.failures_total.clone(),
        );
        sub_registry.register(
            "cost_lookup_failures",
            "Total number of failed cost price lookups",
            metrics.cost_lookup_failures_total.clone(),
        );
        sub_registry.register(
            "alerts_sent",
            "Total number of failure alert emails delivered",
            metrics.alerts_sent_total.clone(),
        );
        sub_registry.register(
            "consecutive_failures",
            "Number of consecutive failed cycles in the current streak",
            metrics.consecutive_failures.clone(),
        );
        metrics
    }

    pub fn record_cycle(&self, disposition: CycleDisposition) {
        self.cycles_total
            .get_or_create(&CycleLabels {
                outcome: disposition.as_str(),
            })
            .inc();
        match disposition {
            CycleDisposition::Applied => {
                self.applied_total.inc();
            }
            CycleDisposition::SubmissionFailed => {
                self.failures_total.inc();
            }
            CycleDisposition::CostLookupFailed => {
                self.cost_lookup_failures_total.inc();
            }
            CycleDisposition::Paused | CycleDisposition::QueueEmpty => {}
        }
    }
}

pub static SYNC_METRICS: OnceCell<SyncMetrics> = OnceCell::const_new();
