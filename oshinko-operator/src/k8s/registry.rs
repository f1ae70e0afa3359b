//! The in-memory registry of clusters known to be deployed.

use std::collections::HashMap;

use oshinko_core::prom::{METRIC_RUNNING_CLUSTERS, METRIC_STARTED_CLUSTERS_TOTAL, METRIC_WORKERS};
use oshinko_core::ClusterInfo;

/// All clusters believed to be deployed in one namespace, keyed by name.
///
/// This is the baseline used by the reconciler between passes. It is owned by a single
/// controller task and is never shared.
#[derive(Debug)]
pub struct RunningClusters {
    namespace: String,
    clusters: HashMap<String, ClusterInfo>,
}

impl RunningClusters {
    /// Create a new instance.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            clusters: Default::default(),
        }
    }

    /// Record the given cluster as deployed, replacing any previous entry of the same name.
    pub fn put(&mut self, cluster: ClusterInfo) {
        let workers = cluster.worker_instances();
        let name = cluster.name.clone();
        if self.clusters.insert(name.clone(), cluster).is_none() {
            metrics::increment_counter!(METRIC_STARTED_CLUSTERS_TOTAL, "namespace" => self.namespace.clone());
            metrics::gauge!(METRIC_RUNNING_CLUSTERS, self.clusters.len() as f64, "namespace" => self.namespace.clone());
        }
        metrics::gauge!(METRIC_WORKERS, workers as f64, "namespace" => self.namespace.clone(), "cluster" => name);
    }

    /// Forget the named cluster.
    pub fn delete(&mut self, name: &str) -> Option<ClusterInfo> {
        let removed = self.clusters.remove(name);
        if removed.is_some() {
            metrics::gauge!(METRIC_RUNNING_CLUSTERS, self.clusters.len() as f64, "namespace" => self.namespace.clone());
            metrics::gauge!(METRIC_WORKERS, 0.0, "namespace" => self.namespace.clone(), "cluster" => name.to_string());
        }
        removed
    }

    /// Get the named cluster.
    pub fn get(&self, name: &str) -> Option<&ClusterInfo> {
        self.clusters.get(name)
    }

    /// Check if the named cluster is known.
    pub fn contains(&self, name: &str) -> bool {
        self.clusters.contains_key(name)
    }

    /// Zero all derived gauges, keeping the entries.
    pub fn reset_metrics(&self) {
        metrics::gauge!(METRIC_RUNNING_CLUSTERS, 0.0, "namespace" => self.namespace.clone());
        for name in self.clusters.keys() {
            metrics::gauge!(METRIC_WORKERS, 0.0, "namespace" => self.namespace.clone(), "cluster" => name.clone());
        }
    }

    /// Iterate over all known clusters.
    pub fn iter(&self) -> impl Iterator<Item = &ClusterInfo> {
        self.clusters.values()
    }

    /// The number of known clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// Check if no clusters are known.
    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}
