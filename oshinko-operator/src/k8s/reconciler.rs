//! The reconciliation engine.
//!
//! Discrete watch events converge a single cluster immediately, while the periodic full
//! reconciliation diffs the declared clusters against the live worker replication controllers
//! of the whole namespace and repairs any drift.
//!
//! All state lives in the reconciler, which is owned by exactly one controller task. Registry
//! entries are only updated once the corresponding API call has been accepted.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::Result;
use oshinko_core::prom::METRIC_RECONCILIATIONS_TOTAL;
use oshinko_core::ClusterInfo;

use crate::k8s::api::ClusterApi;
use crate::k8s::deployer::{cluster_name_label, worker_rc_name, ClusterDeployer};
use crate::k8s::init_containers::expected_cm_name;
use crate::k8s::policy::{decide, Action};
use crate::k8s::registry::RunningClusters;
use crate::k8s::ALL_NAMESPACES;

/// Live worker replica counts, keyed by cluster name.
pub type ActualState = BTreeMap<String, u32>;

/// A cluster lifecycle event.
#[derive(Clone, Debug, PartialEq)]
pub enum ClusterEvent {
    Added(ClusterInfo),
    Modified(ClusterInfo),
    /// Only the name & namespace of the cluster are meaningful.
    Deleted(ClusterInfo),
}

/// The outcome of one full reconciliation pass.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReconciliationReport {
    /// Clusters declared but not running.
    pub created: BTreeSet<String>,
    /// Clusters running but no longer declared.
    pub deleted: BTreeSet<String>,
    /// Clusters whose worker count differs from their declaration.
    pub drifted: BTreeSet<String>,
}

impl ReconciliationReport {
    /// Check if the pass detected any change.
    pub fn changed(&self) -> bool {
        !(self.created.is_empty() && self.deleted.is_empty() && self.drifted.is_empty())
    }
}

/// The reconciliation engine of one watched namespace.
pub struct Reconciler<A: ClusterApi> {
    /// The watched namespace, or `*` for all namespaces.
    namespace: String,
    /// The cluster API used for all mutations.
    api: A,
    /// The builder of cluster objects.
    deployer: ClusterDeployer,
    /// All clusters believed to be deployed.
    clusters: RunningClusters,
    /// The last seen declaration of every cluster, as listed or watched.
    declared: BTreeMap<String, ClusterInfo>,
    /// Whether a full reconciliation has completed since start.
    full_reconciliation_run: bool,
    /// The number of completed full reconciliations.
    completed_passes: u64,
}

impl<A: ClusterApi> Reconciler<A> {
    /// Create a new instance.
    pub fn new(namespace: impl Into<String>, api: A, deployer: ClusterDeployer) -> Self {
        let namespace = namespace.into();
        Self {
            clusters: RunningClusters::new(namespace.clone()),
            declared: Default::default(),
            namespace,
            api,
            deployer,
            full_reconciliation_run: false,
            completed_passes: 0,
        }
    }

    /// The registry of clusters believed to be deployed.
    pub fn clusters(&self) -> &RunningClusters {
        &self.clusters
    }

    /// The number of completed full reconciliations.
    pub fn completed_passes(&self) -> u64 {
        self.completed_passes
    }

    /// The cluster API of this reconciler.
    #[cfg(test)]
    pub fn api(&self) -> &A {
        &self.api
    }

    /// Handle a single cluster event.
    pub async fn handle_event(&mut self, event: ClusterEvent) -> Result<()> {
        match event {
            ClusterEvent::Added(cluster) => self.on_add(cluster).await,
            ClusterEvent::Modified(cluster) => self.on_modify(cluster).await,
            ClusterEvent::Deleted(cluster) => self.on_delete(&cluster).await,
        }
    }

    /// Deploy the full object set of the given cluster.
    #[tracing::instrument(level = "debug", skip(self, cluster), fields(name = %cluster.name))]
    pub async fn on_add(&mut self, cluster: ClusterInfo) -> Result<()> {
        tracing::info!(name = %cluster.name, "creating cluster");
        self.deploy(&cluster).await?;
        self.clusters.put(cluster);
        Ok(())
    }

    /// Move a deployed cluster to the given spec, scaling in place when possible.
    #[tracing::instrument(level = "debug", skip(self, cluster), fields(name = %cluster.name))]
    pub async fn on_modify(&mut self, cluster: ClusterInfo) -> Result<()> {
        let existing = match self.clusters.get(&cluster.name) {
            Some(existing) => existing,
            None => {
                tracing::error!(
                    name = %cluster.name,
                    "unable to modify cluster which is not known to be deployed, dropping event"
                );
                return Ok(());
            }
        };
        match decide(existing, &cluster) {
            Action::Scale(replicas) => {
                tracing::info!(
                    name = %cluster.name,
                    from = existing.worker_instances(),
                    to = replicas,
                    "scaling cluster workers"
                );
                let namespace = self.target_namespace(&cluster).to_string();
                self.api
                    .scale_replication_controller(&worker_rc_name(&cluster.name), &namespace, replicas)
                    .await?;
            }
            Action::Recreate => {
                tracing::info!(name = %cluster.name, "recreating cluster");
                self.deploy(&cluster).await?;
            }
        }
        self.clusters.put(cluster);
        Ok(())
    }

    /// Delete all objects of the given cluster.
    ///
    /// Only the cluster's name & namespace are used.
    #[tracing::instrument(level = "debug", skip(self, cluster), fields(name = %cluster.name))]
    pub async fn on_delete(&mut self, cluster: &ClusterInfo) -> Result<()> {
        tracing::info!(name = %cluster.name, "deleting cluster");
        let labels = self.deployer.default_labels(&cluster.name);
        self.api.delete_by_labels(&labels, self.target_namespace(cluster)).await?;
        self.clusters.delete(&cluster.name);
        Ok(())
    }

    /// Converge the namespace to the given set of declared clusters.
    ///
    /// Returns `None` when the pass is skipped, which is the case when watching all namespaces.
    /// Failures of individual clusters are logged and do not stop the pass.
    #[tracing::instrument(level = "debug", skip(self, desired))]
    pub async fn full_reconciliation(&mut self, desired: Vec<ClusterInfo>) -> Result<Option<ReconciliationReport>> {
        if self.namespace == ALL_NAMESPACES {
            tracing::info!("skipping full reconciliation for all namespaces, not supported");
            return Ok(None);
        }
        tracing::info!(namespace = %self.namespace, "running full reconciliation");

        let desired: BTreeMap<String, ClusterInfo> = desired.into_iter().map(|cluster| (cluster.name.clone(), cluster)).collect();
        let actual = self.actual_state().await?;
        tracing::debug!(?desired, ?actual, "computed desired & actual state");

        self.observe_listing(&desired);

        let desired_names: BTreeSet<String> = desired.keys().cloned().collect();
        let actual_names: BTreeSet<String> = actual.keys().cloned().collect();
        let mut report = ReconciliationReport {
            created: desired_names.difference(&actual_names).cloned().collect(),
            deleted: actual_names.difference(&desired_names).cloned().collect(),
            drifted: Default::default(),
        };
        if !report.created.is_empty() {
            tracing::info!(clusters = ?report.created, "clusters to be created");
        }
        if !report.deleted.is_empty() {
            tracing::info!(clusters = ?report.deleted, "clusters to be deleted");
        }

        let is_first_run = !self.full_reconciliation_run;
        if is_first_run {
            self.clusters.reset_metrics();
        }

        for name in report.created.iter() {
            if let Some(cluster) = desired.get(name) {
                if let Err(err) = self.on_add(cluster.clone()).await {
                    tracing::error!(error = ?err, %name, "error creating cluster during full reconciliation");
                }
            }
        }

        for name in report.deleted.iter() {
            let cluster = ClusterInfo::named(name.as_str(), self.namespace.as_str());
            if let Err(err) = self.on_delete(&cluster).await {
                tracing::error!(error = ?err, %name, "error deleting cluster during full reconciliation");
            }
        }

        for name in desired_names.intersection(&actual_names) {
            let (cluster, actual_workers) = match (desired.get(name), actual.get(name)) {
                (Some(cluster), Some(actual_workers)) => (cluster, *actual_workers),
                _ => continue,
            };
            if actual_workers == cluster.worker_instances() {
                if is_first_run || !self.clusters.contains(name) {
                    self.clusters.put(cluster.clone());
                }
                continue;
            }

            report.drifted.insert(name.clone());
            if is_first_run {
                // Counts changed before this process could observe them are adopted as-is.
                tracing::info!(%name, actual_workers, "adopting observed worker count");
                self.clusters.put(cluster.with_worker_instances(actual_workers));
                continue;
            }
            let base = self.clusters.get(name).unwrap_or(cluster);
            let observed = base.with_worker_instances(actual_workers);
            self.clusters.put(observed);
            tracing::info!(%name, actual_workers, desired_workers = cluster.worker_instances(), "repairing worker count drift");
            if let Err(err) = self.on_modify(cluster.clone()).await {
                tracing::error!(error = ?err, %name, "error repairing cluster during full reconciliation");
            }
        }

        if !report.changed() {
            tracing::info!("no change was detected during the reconciliation");
        }
        self.full_reconciliation_run = true;
        self.completed_passes += 1;
        metrics::increment_counter!(METRIC_RECONCILIATIONS_TOTAL, "namespace" => self.namespace.clone());
        Ok(Some(report))
    }

    /// Classify an applied record against its last seen declaration.
    ///
    /// Clusters not known to be deployed are added. Deployed clusters are modified, unless their
    /// declaration is unchanged.
    pub fn classify_applied(&mut self, cluster: ClusterInfo) -> Option<ClusterEvent> {
        let unchanged = self.declared.get(&cluster.name) == Some(&cluster);
        self.declared.insert(cluster.name.clone(), cluster.clone());
        match (self.clusters.contains(&cluster.name), unchanged) {
            (false, _) => Some(ClusterEvent::Added(cluster)),
            (true, true) => None,
            (true, false) => Some(ClusterEvent::Modified(cluster)),
        }
    }

    /// Classify a removed record, forgetting its declaration.
    pub fn classify_deleted(&mut self, name: &str, namespace: &str) -> ClusterEvent {
        self.declared.remove(name);
        ClusterEvent::Deleted(ClusterInfo::named(name, namespace))
    }

    /// Classify a complete relisting of records.
    ///
    /// Clusters declared or deployed before, but absent from the listing, are deleted.
    pub fn classify_restarted(&mut self, listed: Vec<ClusterInfo>) -> Vec<ClusterEvent> {
        let listed_names: BTreeSet<String> = listed.iter().map(|cluster| cluster.name.clone()).collect();
        let mut gone: BTreeMap<String, String> = BTreeMap::new();
        for cluster in self.declared.values().chain(self.clusters.iter()) {
            if !listed_names.contains(&cluster.name) {
                gone.entry(cluster.name.clone()).or_insert_with(|| cluster.namespace.clone());
            }
        }

        let mut events: Vec<ClusterEvent> = listed.into_iter().filter_map(|cluster| self.classify_applied(cluster)).collect();
        for (name, namespace) in gone {
            events.push(self.classify_deleted(&name, &namespace));
        }
        events
    }

    /// Record the declarations of a full listing.
    ///
    /// Known declarations are kept as-is until the watcher delivers a change.
    fn observe_listing(&mut self, desired: &BTreeMap<String, ClusterInfo>) {
        self.declared.retain(|name, _| desired.contains_key(name));
        for (name, cluster) in desired.iter() {
            self.declared.entry(name.clone()).or_insert_with(|| cluster.clone());
        }
    }

    /// Observe the live worker replica counts of all clusters.
    async fn actual_state(&self) -> Result<ActualState> {
        let label = cluster_name_label();
        let rcs = self
            .api
            .list_replication_controllers(&self.deployer.worker_selector_labels(), &self.namespace)
            .await?;
        Ok(rcs
            .into_iter()
            .filter_map(|rc| rc.labels.get(&label).map(|name| (name.clone(), rc.replicas)))
            .collect())
    }

    /// Build & submit the full object set of the given cluster.
    async fn deploy(&self, cluster: &ClusterInfo) -> Result<()> {
        let namespace = self.target_namespace(cluster);
        let cm_name = expected_cm_name(cluster);
        let cm_exists = match self.api.config_map_exists(&cm_name, namespace).await {
            Ok(exists) => exists,
            Err(err) => {
                tracing::warn!(error = ?err, config_map = %cm_name, "error checking for override config map, assuming absent");
                false
            }
        };
        let objects = self.deployer.resource_list(cluster, cm_exists);
        self.api.create_or_replace(&objects, namespace).await
    }

    /// The namespace in which the given cluster's objects live.
    fn target_namespace<'a>(&'a self, cluster: &'a ClusterInfo) -> &'a str {
        if cluster.namespace.is_empty() {
            self.namespace.as_str()
        } else {
            cluster.namespace.as_str()
        }
    }
}
