pub mod cluster;
pub mod crd;
pub mod error;
pub mod prom;

pub use cluster::ClusterInfo;
pub use error::AppError;

/// The prefix of all Oshinko labels.
pub const LABEL_PREFIX: &str = "radanalytics.io/";
/// The label identifying the kind of a record or of a generated object.
pub const LABEL_KIND: &str = "radanalytics.io/kind";
/// The label identifying the role of a generated replication controller.
pub const LABEL_RC_TYPE: &str = "radanalytics.io/rcType";
/// The label identifying the controller which manages an object.
pub const LABEL_MANAGED_BY: &str = "app.kubernetes.io/managed-by";

/// The kind of the declared cluster records.
pub const SPARK_CLUSTER_KIND: &str = "SparkCluster";
/// The lowercase entity name used for labelling generated objects.
pub const SPARK_CLUSTER_ENTITY: &str = "sparkcluster";
/// The data key of a config map record holding the cluster spec.
pub const CM_CONFIG_KEY: &str = "config";
/// The name of the operator, used as field manager and managed-by label.
pub const OPERATOR_NAME: &str = "oshinko-operator";
