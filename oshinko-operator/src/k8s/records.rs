//! The kinds of declarative records which may describe a Spark cluster.

use std::fmt::Debug;

use anyhow::Result;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ListParams;
use kube::Resource;
use serde::de::DeserializeOwned;

use oshinko_core::crd::SparkCluster;
use oshinko_core::{ClusterInfo, LABEL_KIND, SPARK_CLUSTER_KIND};

/// A kind of K8s object which declares Spark clusters.
///
/// One controller instance watches exactly one record kind.
pub trait DeclaredRecord: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static {
    /// The list params selecting candidate records of this kind.
    fn list_params() -> ListParams;

    /// Check if this object declares a Spark cluster.
    fn is_declared_record(&self) -> bool;

    /// Parse the declared cluster out of this object.
    fn parse(&self) -> Result<ClusterInfo>;

    /// The name of this object.
    fn record_name(&self) -> Option<&str> {
        self.meta().name.as_deref()
    }
}

impl DeclaredRecord for SparkCluster {
    fn list_params() -> ListParams {
        ListParams::default()
    }

    fn is_declared_record(&self) -> bool {
        true
    }

    fn parse(&self) -> Result<ClusterInfo> {
        Ok(ClusterInfo::from_custom_resource(self))
    }
}

impl DeclaredRecord for ConfigMap {
    fn list_params() -> ListParams {
        ListParams::default().labels(&format!("{}={}", LABEL_KIND, SPARK_CLUSTER_KIND))
    }

    fn is_declared_record(&self) -> bool {
        ClusterInfo::is_cluster_config_map(self)
    }

    fn parse(&self) -> Result<ClusterInfo> {
        Ok(ClusterInfo::from_config_map(self)?)
    }
}

/// Parse all cluster records among the given objects, skipping any which fail to parse.
pub fn parse_records<R: DeclaredRecord>(records: &[R]) -> Vec<ClusterInfo> {
    records
        .iter()
        .filter(|record| record.is_declared_record())
        .filter_map(|record| match record.parse() {
            Ok(cluster) => Some(cluster),
            Err(err) => {
                tracing::error!(error = ?err, name = ?record.record_name(), "error parsing cluster record, skipping");
                None
            }
        })
        .collect()
}
