//! The K8s API operations used by the reconciler.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{ConfigMap, Pod, ReplicationController, Service};
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams};
use kube::client::Client;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::time::timeout;

use crate::k8s::deployer::ResourceObjectSet;
use crate::k8s::ALL_NAMESPACES;
use oshinko_core::OPERATOR_NAME;

/// The default timeout to use for API calls.
pub(crate) const API_TIMEOUT: Duration = Duration::from_secs(5);

/// A replication controller as observed live.
#[derive(Clone, Debug, PartialEq)]
pub struct ObservedController {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub replicas: u32,
}

/// The cluster API operations the reconciler depends upon.
///
/// Every call is blocking from the reconciler's point of view, and no retries happen within a
/// single call.
#[async_trait::async_trait]
pub trait ClusterApi: Send + Sync {
    /// Create or replace every object of the given set.
    async fn create_or_replace(&self, objects: &ResourceObjectSet, namespace: &str) -> Result<()>;

    /// Delete all services, replication controllers & pods matching the given labels.
    async fn delete_by_labels(&self, labels: &BTreeMap<String, String>, namespace: &str) -> Result<()>;

    /// Set the number of replicas of the named replication controller.
    async fn scale_replication_controller(&self, name: &str, namespace: &str, replicas: u32) -> Result<()>;

    /// List all replication controllers matching the given labels.
    async fn list_replication_controllers(&self, labels: &BTreeMap<String, String>, namespace: &str) -> Result<Vec<ObservedController>>;

    /// Check if the named config map exists.
    async fn config_map_exists(&self, name: &str, namespace: &str) -> Result<bool>;
}

/// A `ClusterApi` backed by a live K8s cluster.
#[derive(Clone)]
pub struct KubeClusterApi {
    client: Client,
}

impl KubeClusterApi {
    /// Create a new instance.
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build an API handle for the given namespace, where `*` means all namespaces.
    fn api<K>(&self, namespace: &str) -> Api<K>
    where
        K: Resource<DynamicType = ()>,
    {
        if namespace == ALL_NAMESPACES {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), namespace)
        }
    }

    /// Create or replace the given object using Server-Side Apply.
    #[tracing::instrument(level = "debug", skip(self, obj))]
    async fn apply<K>(&self, obj: &K, namespace: &str) -> Result<()>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize,
    {
        let name = obj.meta().name.as_deref().unwrap_or_default();
        tracing::info!(%name, kind = %K::kind(&()), "applying object");
        let api: Api<K> = Api::namespaced(self.client.clone(), namespace);
        let mut params = PatchParams::apply(OPERATOR_NAME);
        params.force = true;
        timeout(API_TIMEOUT, api.patch(name, &params, &Patch::Apply(obj)))
            .await
            .with_context(|| format!("timeout while applying {} {}", K::kind(&()), name))?
            .with_context(|| format!("error applying {} {}", K::kind(&()), name))
            .map(|_| ())
    }

    /// Delete all objects of one kind matching the given label selector.
    ///
    /// All matching objects are attempted, even if some fail; the last error is returned.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn delete_all<K>(&self, selector: &str, namespace: &str) -> Result<()>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
    {
        let api: Api<K> = self.api(namespace);
        let lp = ListParams::default().labels(selector);
        let objects = timeout(API_TIMEOUT, api.list(&lp))
            .await
            .with_context(|| format!("timeout while listing {} objects", K::kind(&())))?
            .with_context(|| format!("error listing {} objects", K::kind(&())))?;
        let mut error = None;
        for obj in objects {
            let (name, ns) = match (obj.meta().name.as_ref(), obj.meta().namespace.as_ref()) {
                (Some(name), Some(ns)) => (name, ns),
                _ => continue,
            };
            tracing::info!(%name, kind = %K::kind(&()), "deleting object");
            let api: Api<K> = Api::namespaced(self.client.clone(), ns);
            let res = match timeout(API_TIMEOUT, api.delete(name, &DeleteParams::default())).await {
                Ok(res) => res,
                Err(_) => {
                    tracing::error!(%name, "timeout while deleting object");
                    error = Some(anyhow::anyhow!("timeout while deleting {} {}", K::kind(&()), name));
                    continue;
                }
            };
            match res {
                Ok(_) => (),
                Err(kube::Error::Api(api_err)) if api_err.code == http::StatusCode::NOT_FOUND => (),
                Err(err) => {
                    tracing::error!(error = ?err, %name, "error deleting object");
                    error = Some(anyhow::Error::from(err).context(format!("error deleting {} {}", K::kind(&()), name)));
                }
            }
        }
        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ClusterApi for KubeClusterApi {
    #[tracing::instrument(level = "debug", skip(self, objects))]
    async fn create_or_replace(&self, objects: &ResourceObjectSet, namespace: &str) -> Result<()> {
        for service in objects.services.iter() {
            self.apply(service, namespace).await?;
        }
        for rc in objects.replication_controllers.iter() {
            self.apply(rc, namespace).await?;
        }
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self, labels))]
    async fn delete_by_labels(&self, labels: &BTreeMap<String, String>, namespace: &str) -> Result<()> {
        let selector = label_selector(labels);
        // Each kind is attempted regardless of failures of the others.
        let services = self.delete_all::<Service>(&selector, namespace).await;
        let rcs = self.delete_all::<ReplicationController>(&selector, namespace).await;
        let pods = self.delete_all::<Pod>(&selector, namespace).await;
        services.and(rcs).and(pods)
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn scale_replication_controller(&self, name: &str, namespace: &str, replicas: u32) -> Result<()> {
        tracing::info!(%name, replicas, "scaling replication controller");
        let api: Api<ReplicationController> = Api::namespaced(self.client.clone(), namespace);
        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        timeout(API_TIMEOUT, api.patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch)))
            .await
            .context("timeout while scaling replication controller")?
            .context("error scaling replication controller")
            .map(|_| ())
    }

    #[tracing::instrument(level = "debug", skip(self, labels))]
    async fn list_replication_controllers(&self, labels: &BTreeMap<String, String>, namespace: &str) -> Result<Vec<ObservedController>> {
        let api: Api<ReplicationController> = self.api(namespace);
        let lp = ListParams::default().labels(&label_selector(labels));
        let rcs = timeout(API_TIMEOUT, api.list(&lp))
            .await
            .context("timeout while listing replication controllers")?
            .context("error listing replication controllers")?;
        Ok(rcs
            .into_iter()
            .map(|rc| ObservedController {
                name: rc.metadata.name.unwrap_or_default(),
                labels: rc.metadata.labels.unwrap_or_default(),
                replicas: rc.spec.and_then(|spec| spec.replicas).unwrap_or(0).max(0) as u32,
            })
            .collect())
    }

    #[tracing::instrument(level = "debug", skip(self))]
    async fn config_map_exists(&self, name: &str, namespace: &str) -> Result<bool> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        let res = timeout(API_TIMEOUT, api.get(name)).await.context("timeout while fetching config map")?;
        match res {
            Ok(_) => Ok(true),
            Err(kube::Error::Api(api_err)) if api_err.code == http::StatusCode::NOT_FOUND => Ok(false),
            Err(err) => Err(err).context("error fetching config map"),
        }
    }
}

/// Render the given labels as a comma-separated equality selector.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels.iter().map(|(key, val)| format!("{}={}", key, val)).collect::<Vec<_>>().join(",")
}
