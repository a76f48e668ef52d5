use crate::build_info;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use tokio::sync::OnceCell;

/// Process-wide enqueueing metrics, set once at server startup.
///
/// Manager code reads this with `get()` and skips metric updates when no
/// server was started (admin one-shot commands, unit tests).
pub static ENQUEUE_METRICS: OnceCell<EnqueueMetrics> = OnceCell::const_new();

/// Registers immutable build metadata for `/metrics` scraping.
///
/// We encode this as a labeled gauge with value `1` so the metric is valid
/// for Prometheus text exposition format and still carries stable build
/// labels.
pub fn register_build_info_metric(registry: &mut Registry, prefix: &str) {
    let build_info_metric = Family::<BuildInfoLabels, Gauge>::default();
    build_info_metric
        .get_or_create(&BuildInfoLabels {
            service: "reindex_worker",
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

/// Label set for immutable build identity exported on the build-info metric.
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct BuildInfoLabels {
    service: &'static str,
    version: &'static str,
    commit: &'static str,
}

#[derive(Clone)]
pub struct EnqueueMetrics {
    /// Number of sessions created or wholesale-restarted by init.
    pub sessions_initialized_total: Counter,
    /// Number of sessions explicitly terminated by an operator.
    pub sessions_terminated_total: Counter,
    /// Number of sessions that reached the end of enumeration.
    pub sessions_completed_total: Counter,
    /// Number of batch steps that fetched at least one identifier.
    pub batches_processed_total: Counter,
    /// Number of identifiers appended to the indexing backlog.
    ///
    /// This is a throughput-oriented counter. Use PromQL `rate()` for
    /// identifiers/sec.
    pub identifiers_enqueued_total: Counter,
}

impl EnqueueMetrics {
    fn init() -> Self {
        Self {
            sessions_initialized_total: Counter::default(),
            sessions_terminated_total: Counter::default(),
            sessions_completed_total: Counter::default(),
            batches_processed_total: Counter::default(),
            identifiers_enqueued_total: Counter::default(),
        }
    }

    pub fn register(registry: &mut Registry, prefix: &str) -> Self {
        let metrics = Self::init();
        let sub_registry = registry.sub_registry_with_prefix(prefix);
        sub_registry.register(
            "sessions_initialized",
            "Total number of enqueueing sessions initialized",
            metrics.sessions_initialized_total.clone(),
        );
        sub_registry.register(
            "sessions_terminated",
            "Total number of enqueueing sessions terminated by an operator",
            metrics.sessions_terminated_total.clone(),
        );
        sub_registry.register(
            "sessions_completed",
            "Total number of enqueueing sessions that finished enumeration",
            metrics.sessions_completed_total.clone(),
        );
        sub_registry.register(
            "batches_processed",
            "Total number of non-empty batch steps",
            metrics.batches_processed_total.clone(),
        );
        sub_registry.register(
            "identifiers_enqueued",
            "Total number of identifiers appended to the indexing backlog",
            metrics.identifiers_enqueued_total.clone(),
        );
        metrics
    }
}
