//! The operator's view of a declared Spark cluster.

use k8s_openapi::api::core::v1::ConfigMap;

use crate::crd::{RequiredMetadata, SparkCluster, SparkClusterSpec};
use crate::error::AppError;
use crate::{CM_CONFIG_KEY, LABEL_KIND, SPARK_CLUSTER_KIND};

/// A declared Spark cluster, independent of the record type it was declared with.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ClusterInfo {
    /// The name of the cluster.
    pub name: String,
    /// The namespace of the declaring record.
    pub namespace: String,
    /// The declared cluster spec.
    pub spec: SparkClusterSpec,
}

impl ClusterInfo {
    /// Create a new instance.
    pub fn new(name: impl Into<String>, namespace: impl Into<String>, spec: SparkClusterSpec) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
            spec,
        }
    }

    /// Build a cluster from a SparkCluster custom resource.
    pub fn from_custom_resource(cr: &SparkCluster) -> Self {
        Self::new(cr.name(), cr.namespace(), cr.spec.clone())
    }

    /// Build a cluster from a config map record.
    ///
    /// The cluster spec is expected as YAML under the `config` data key.
    pub fn from_config_map(cm: &ConfigMap) -> Result<Self, AppError> {
        let name = cm.metadata.name.as_deref().unwrap_or_default();
        let namespace = cm.metadata.namespace.as_deref().unwrap_or_default();
        let raw = cm
            .data
            .as_ref()
            .and_then(|data| data.get(CM_CONFIG_KEY))
            .ok_or_else(|| AppError::MissingData(name.into()))?;
        let spec: SparkClusterSpec = if raw.trim().is_empty() {
            Default::default()
        } else {
            serde_yaml::from_str(raw).map_err(|err| AppError::InvalidInput(format!("config map {}: {}", name, err)))?
        };
        Ok(Self::new(name, namespace, spec))
    }

    /// Check if the given config map is a Spark cluster record.
    pub fn is_cluster_config_map(cm: &ConfigMap) -> bool {
        cm.metadata
            .labels
            .as_ref()
            .and_then(|labels| labels.get(LABEL_KIND))
            .map(|kind| kind == SPARK_CLUSTER_KIND)
            .unwrap_or(false)
    }

    /// A minimal cluster carrying only a name, used when only the name of a cluster is known.
    pub fn named(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self::new(name, namespace, Default::default())
    }

    /// Clone this cluster with the number of worker instances replaced.
    pub fn with_worker_instances(&self, instances: u32) -> Self {
        let mut cluster = self.clone();
        cluster.spec.worker.instances = instances;
        cluster
    }

    /// The number of declared worker instances.
    pub fn worker_instances(&self) -> u32 {
        self.spec.worker.instances
    }
}
