//! Builders for the K8s objects backing a Spark cluster.
//!
//! Everything here is pure: the same cluster & flags always yield the same objects. Objects are
//! built fresh for every create-or-replace and are never mutated after submission.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, HTTPGetAction, PodSpec, PodTemplateSpec, Probe, ReplicationController,
    ReplicationControllerSpec, ResourceRequirements, Service, ServicePort,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::ObjectMeta;
use kube::Resource;

use crate::k8s::init_containers::{add_init_containers, expected_delay};
use oshinko_core::crd::RoleSpec;
use oshinko_core::{ClusterInfo, LABEL_KIND, LABEL_MANAGED_BY, LABEL_PREFIX, LABEL_RC_TYPE, OPERATOR_NAME, SPARK_CLUSTER_ENTITY};

/// The port of the Spark master used by workers & drivers.
pub const SPARK_MASTER_PORT: i32 = 7077;
/// The port of the Spark master's web UI.
pub const SPARK_MASTER_UI_PORT: i32 = 8080;
/// The port of the Spark worker's web UI.
pub const SPARK_WORKER_UI_PORT: i32 = 8081;

/// The role value for master objects.
pub const ROLE_MASTER: &str = "master";
/// The role value for worker objects.
pub const ROLE_WORKER: &str = "worker";

/// The full set of K8s objects backing one cluster.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ResourceObjectSet {
    pub replication_controllers: Vec<ReplicationController>,
    pub services: Vec<Service>,
}

/// The name of the master replication controller of a cluster.
pub fn master_rc_name(cluster: &str) -> String {
    format!("{}-m", cluster)
}

/// The name of the worker replication controller of a cluster.
pub fn worker_rc_name(cluster: &str) -> String {
    format!("{}-w", cluster)
}

/// The name of the label holding the owning cluster's name.
pub fn cluster_name_label() -> String {
    format!("{}{}", LABEL_PREFIX, SPARK_CLUSTER_ENTITY)
}

/// Builds the object set of Spark clusters.
#[derive(Clone, Debug)]
pub struct ClusterDeployer {
    /// The image used when a cluster declares no custom image.
    default_image: String,
}

impl ClusterDeployer {
    /// Create a new instance.
    pub fn new(default_image: impl Into<String>) -> Self {
        Self {
            default_image: default_image.into(),
        }
    }

    /// The image to use for the given cluster.
    pub fn image_for(&self, cluster: &ClusterInfo) -> String {
        cluster.spec.custom_image.clone().unwrap_or_else(|| self.default_image.clone())
    }

    /// The labels carried by every object of the given cluster.
    ///
    /// Selecting on these labels matches every object of the cluster, across all roles.
    pub fn default_labels(&self, name: &str) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_KIND.into(), SPARK_CLUSTER_ENTITY.into());
        labels.insert(LABEL_MANAGED_BY.into(), OPERATOR_NAME.into());
        labels.insert(cluster_name_label(), name.into());
        labels
    }

    /// The labels selecting the worker replication controllers of every cluster.
    pub fn worker_selector_labels(&self) -> BTreeMap<String, String> {
        let mut labels = BTreeMap::new();
        labels.insert(LABEL_KIND.into(), SPARK_CLUSTER_ENTITY.into());
        labels.insert(LABEL_RC_TYPE.into(), ROLE_WORKER.into());
        labels
    }

    /// The labels of the objects of one role of the given cluster.
    fn role_labels(&self, name: &str, role: &str) -> BTreeMap<String, String> {
        let mut labels = self.default_labels(name);
        labels.insert(LABEL_RC_TYPE.into(), role.into());
        labels
    }

    /// Build the full object set for the given cluster.
    #[tracing::instrument(level = "debug", skip(self, cluster), fields(name = %cluster.name))]
    pub fn resource_list(&self, cluster: &ClusterInfo, cm_exists: bool) -> ResourceObjectSet {
        tracing::debug!(cm_exists, "building object set for cluster");
        let mut services = vec![self.build_master_service(cluster)];
        if cluster.spec.spark_web_ui {
            services.push(self.build_master_ui_service(cluster));
        }
        ResourceObjectSet {
            replication_controllers: vec![self.build_master_rc(cluster, cm_exists), self.build_worker_rc(cluster, cm_exists)],
            services,
        }
    }

    /// Build the master replication controller.
    fn build_master_rc(&self, cluster: &ClusterInfo, cm_exists: bool) -> ReplicationController {
        let mut env = vec![
            env_var("SPARK_MASTER_PORT", SPARK_MASTER_PORT.to_string()),
            env_var("SPARK_MASTER_WEBUI_PORT", SPARK_MASTER_UI_PORT.to_string()),
        ];
        env.extend(self.user_env(cluster));
        let container = Container {
            name: master_rc_name(&cluster.name),
            image: Some(self.image_for(cluster)),
            image_pull_policy: Some("IfNotPresent".into()),
            env: Some(env),
            ports: Some(vec![
                container_port("spark-master", SPARK_MASTER_PORT),
                container_port("spark-webui", SPARK_MASTER_UI_PORT),
            ]),
            resources: role_resources(&cluster.spec.master),
            ..Default::default()
        };
        let delay = expected_delay(cluster, cm_exists, true);
        self.build_rc(
            cluster,
            ROLE_MASTER,
            master_rc_name(&cluster.name),
            cluster.spec.master.instances,
            with_probes(container, SPARK_MASTER_UI_PORT, delay),
            cm_exists,
        )
    }

    /// Build the worker replication controller.
    fn build_worker_rc(&self, cluster: &ClusterInfo, cm_exists: bool) -> ReplicationController {
        let mut env = vec![
            env_var("SPARK_MASTER_ADDRESS", format!("spark://{}:{}", cluster.name, SPARK_MASTER_PORT)),
            env_var("SPARK_MASTER_UI_ADDRESS", format!("http://{}-ui:{}", cluster.name, SPARK_MASTER_UI_PORT)),
        ];
        env.extend(self.user_env(cluster));
        let container = Container {
            name: worker_rc_name(&cluster.name),
            image: Some(self.image_for(cluster)),
            image_pull_policy: Some("IfNotPresent".into()),
            env: Some(env),
            ports: Some(vec![container_port("spark-webui", SPARK_WORKER_UI_PORT)]),
            resources: role_resources(&cluster.spec.worker),
            ..Default::default()
        };
        let delay = expected_delay(cluster, cm_exists, false);
        self.build_rc(
            cluster,
            ROLE_WORKER,
            worker_rc_name(&cluster.name),
            cluster.spec.worker.instances,
            with_probes(container, SPARK_WORKER_UI_PORT, delay),
            cm_exists,
        )
    }

    /// Wrap the given primary container into a replication controller of the given role.
    fn build_rc(&self, cluster: &ClusterInfo, role: &str, name: String, replicas: u32, container: Container, cm_exists: bool) -> ReplicationController {
        let labels = self.role_labels(&cluster.name, role);
        let mut rc = ReplicationController::default();
        rc.meta_mut().name = Some(name);
        rc.meta_mut().namespace = Some(cluster.namespace.clone());
        rc.meta_mut().labels = Some(labels.clone());

        let mut pod_spec = PodSpec {
            containers: vec![container],
            ..Default::default()
        };
        add_init_containers(&mut pod_spec, cluster, &self.image_for(cluster), cm_exists);

        rc.spec = Some(ReplicationControllerSpec {
            replicas: Some(i32::try_from(replicas).unwrap_or(i32::MAX)),
            selector: Some(labels.clone()),
            template: Some(PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(pod_spec),
            }),
            ..Default::default()
        });
        rc
    }

    /// Build the service fronting the Spark master port.
    fn build_master_service(&self, cluster: &ClusterInfo) -> Service {
        self.build_service(cluster, cluster.name.clone(), "spark-master", SPARK_MASTER_PORT)
    }

    /// Build the service fronting the Spark master web UI.
    fn build_master_ui_service(&self, cluster: &ClusterInfo) -> Service {
        self.build_service(cluster, format!("{}-ui", cluster.name), "spark-webui", SPARK_MASTER_UI_PORT)
    }

    fn build_service(&self, cluster: &ClusterInfo, name: String, port_name: &str, port: i32) -> Service {
        let mut service = Service::default();
        service.meta_mut().name = Some(name);
        service.meta_mut().namespace = Some(cluster.namespace.clone());
        service.meta_mut().labels = Some(self.role_labels(&cluster.name, ROLE_MASTER));

        let spec = service.spec.get_or_insert_with(Default::default);
        spec.selector = Some(self.role_labels(&cluster.name, ROLE_MASTER));
        spec.ports = Some(vec![ServicePort {
            name: Some(port_name.into()),
            port,
            protocol: Some("TCP".into()),
            target_port: Some(IntOrString::Int(port)),
            ..Default::default()
        }]);
        service
    }

    fn user_env(&self, cluster: &ClusterInfo) -> Vec<EnvVar> {
        cluster.spec.env.iter().map(|kv| env_var(&kv.name, kv.value.clone())).collect()
    }
}

fn env_var(name: &str, value: String) -> EnvVar {
    EnvVar {
        name: name.into(),
        value: Some(value),
        ..Default::default()
    }
}

fn container_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort {
        name: Some(name.into()),
        container_port: port,
        protocol: Some("TCP".into()),
        ..Default::default()
    }
}

/// Attach readiness & liveness probes against the given web UI port.
fn with_probes(mut container: Container, port: i32, delay: i32) -> Container {
    let probe = |period| Probe {
        initial_delay_seconds: Some(delay),
        period_seconds: Some(period),
        http_get: Some(HTTPGetAction {
            path: Some("/".into()),
            port: IntOrString::Int(port),
            ..Default::default()
        }),
        ..Default::default()
    };
    container.readiness_probe = Some(probe(10));
    container.liveness_probe = Some(probe(20));
    container
}

/// Cpu & memory of a role become both the request and the limit of its container.
fn role_resources(role: &RoleSpec) -> Option<ResourceRequirements> {
    let mut quantities = BTreeMap::new();
    if let Some(cpu) = role.cpu.as_ref() {
        quantities.insert("cpu".to_string(), Quantity(cpu.clone()));
    }
    if let Some(memory) = role.memory.as_ref() {
        quantities.insert("memory".to_string(), Quantity(memory.clone()));
    }
    if quantities.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        limits: Some(quantities.clone()),
        requests: Some(quantities),
    })
}
