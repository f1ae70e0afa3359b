//! Prometheus metric names used by the operator.

pub const METRIC_RECONCILIATIONS_TOTAL: &str = "oshinko_reconciliations_total";
pub const METRIC_RUNNING_CLUSTERS: &str = "oshinko_running_clusters";
pub const METRIC_WORKERS: &str = "oshinko_workers";
pub const METRIC_STARTED_CLUSTERS_TOTAL: &str = "oshinko_started_clusters_total";

/// Register the operator's metrics.
///
/// This function should be called only once, early in the lifetime of the process.
pub fn register_operator_metrics() {
    metrics::register_counter!(METRIC_RECONCILIATIONS_TOTAL, metrics::Unit::Count, "Number of completed full reconciliations.");
    metrics::register_counter!(METRIC_STARTED_CLUSTERS_TOTAL, metrics::Unit::Count, "Number of Spark clusters deployed by the operator.");
    metrics::register_gauge!(METRIC_RUNNING_CLUSTERS, metrics::Unit::Count, "Number of Spark clusters known to the operator.");
    metrics::register_gauge!(METRIC_WORKERS, metrics::Unit::Count, "Number of worker replicas per Spark cluster.");
}
