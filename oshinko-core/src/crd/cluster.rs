//! SparkCluster CRD.
//!
//! The same spec body is used both by the custom resource and by the `config` key of a
//! config map based cluster record.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// CRD spec for the SparkCluster resource.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, CustomResource, JsonSchema)]
#[kube(
    group = "radanalytics.io",
    version = "v1",
    kind = "SparkCluster",
    namespaced,
    derive = "PartialEq",
    shortname = "sc",
    printcolumn = r#"{"name":"Workers","type":"number","jsonPath":".spec.worker.instances"}"#,
    printcolumn = r#"{"name":"Image","type":"string","jsonPath":".spec.customImage"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SparkClusterSpec {
    /// Force an exact image to be used for all cluster pods.
    ///
    /// When not set, the operator's configured default image is used.
    #[serde(default)]
    pub custom_image: Option<String>,
    /// The master role of the cluster.
    #[serde(default)]
    pub master: RoleSpec,
    /// The worker role of the cluster.
    ///
    /// The number of worker instances is the only value which can be changed without causing
    /// the cluster's objects to be recreated.
    #[serde(default)]
    pub worker: RoleSpec,
    /// Data to be downloaded into the pods before Spark starts, in order.
    #[serde(default)]
    pub download_data: Vec<DownloadDatum>,
    /// Key/value pairs appended to `spark-defaults.conf`, in order.
    #[serde(default)]
    pub spark_configuration: Vec<NameValue>,
    /// The name of a config map whose files override the default Spark configuration.
    #[serde(default)]
    pub spark_configuration_map: Option<String>,
    /// Extra environment variables for the master & worker containers.
    #[serde(default)]
    pub env: Vec<NameValue>,
    /// Expose the master's web UI through a dedicated service.
    #[serde(default = "SparkClusterSpec::spark_web_ui_default", rename = "sparkWebUI")]
    pub spark_web_ui: bool,
}

impl SparkClusterSpec {
    fn spark_web_ui_default() -> bool {
        true
    }
}

impl Default for SparkClusterSpec {
    fn default() -> Self {
        Self {
            custom_image: None,
            master: Default::default(),
            worker: Default::default(),
            download_data: vec![],
            spark_configuration: vec![],
            spark_configuration_map: None,
            env: vec![],
            spark_web_ui: Self::spark_web_ui_default(),
        }
    }
}

/// The spec of one cluster role.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoleSpec {
    /// The number of replicas of this role.
    #[serde(default = "RoleSpec::instances_default")]
    pub instances: u32,
    /// CPU request & limit of the role's container, as a K8s quantity.
    #[serde(default)]
    pub cpu: Option<String>,
    /// Memory request & limit of the role's container, as a K8s quantity.
    #[serde(default)]
    pub memory: Option<String>,
}

impl RoleSpec {
    fn instances_default() -> u32 {
        1
    }
}

impl Default for RoleSpec {
    fn default() -> Self {
        Self {
            instances: Self::instances_default(),
            cpu: None,
            memory: None,
        }
    }
}

/// A single file to download before the cluster starts.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct DownloadDatum {
    /// The URL to fetch.
    pub url: String,
    /// The target path. A trailing `/` marks a directory.
    pub to: String,
}

/// A generic name/value pair.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, JsonSchema)]
pub struct NameValue {
    pub name: String,
    pub value: String,
}
