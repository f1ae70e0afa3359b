use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::{Container, PodSpec, ReplicationController};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use super::deployer::*;
use oshinko_core::crd::{DownloadDatum, NameValue, SparkClusterSpec};
use oshinko_core::{ClusterInfo, LABEL_KIND, LABEL_RC_TYPE};

const IMAGE: &str = "example.com/spark:default";

fn cluster(spec: SparkClusterSpec) -> ClusterInfo {
    ClusterInfo::new("my-spark", "spark", spec)
}

fn pod_spec(rc: &ReplicationController) -> Result<&PodSpec> {
    rc.spec
        .as_ref()
        .and_then(|spec| spec.template.as_ref())
        .and_then(|template| template.spec.as_ref())
        .context("expected replication controller to carry a pod spec")
}

fn primary(rc: &ReplicationController) -> Result<&Container> {
    pod_spec(rc)?.containers.first().context("expected a primary container")
}

fn find_rc<'a>(objects: &'a ResourceObjectSet, name: &str) -> Result<&'a ReplicationController> {
    objects
        .replication_controllers
        .iter()
        .find(|rc| rc.metadata.name.as_deref() == Some(name))
        .with_context(|| format!("expected replication controller {}", name))
}

fn init_container_names(rc: &ReplicationController) -> Result<Vec<String>> {
    Ok(pod_spec(rc)?
        .init_containers
        .as_ref()
        .map(|containers| containers.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default())
}

#[test]
fn resource_list_is_deterministic() -> Result<()> {
    let deployer = ClusterDeployer::new(IMAGE);
    let cluster = cluster(SparkClusterSpec {
        download_data: vec![DownloadDatum { url: "http://x/f.tar".into(), to: "/tmp/".into() }],
        spark_configuration: vec![NameValue { name: "spark.a".into(), value: "1".into() }],
        ..Default::default()
    });

    let first = deployer.resource_list(&cluster, true);
    let second = deployer.resource_list(&cluster, true);
    assert!(first == second, "expected identical object sets for identical inputs");
    Ok(())
}

#[test]
fn resource_list_builds_named_objects() -> Result<()> {
    let deployer = ClusterDeployer::new(IMAGE);
    let mut spec = SparkClusterSpec::default();
    spec.worker.instances = 3;
    let objects = deployer.resource_list(&cluster(spec), false);

    assert!(objects.replication_controllers.len() == 2, "expected a master & a worker rc");
    let master = find_rc(&objects, "my-spark-m")?;
    let worker = find_rc(&objects, "my-spark-w")?;
    let master_replicas = master.spec.as_ref().and_then(|spec| spec.replicas);
    let worker_replicas = worker.spec.as_ref().and_then(|spec| spec.replicas);
    assert!(master_replicas == Some(1), "unexpected master replicas {:?}", master_replicas);
    assert!(worker_replicas == Some(3), "unexpected worker replicas {:?}", worker_replicas);

    let service_names: Vec<_> = objects.services.iter().filter_map(|svc| svc.metadata.name.as_deref()).collect();
    assert!(service_names == vec!["my-spark", "my-spark-ui"], "unexpected services {:?}", service_names);
    let master_port = objects.services[0].spec.as_ref().and_then(|spec| spec.ports.as_ref()).map(|ports| ports[0].port);
    assert!(master_port == Some(SPARK_MASTER_PORT), "unexpected master service port {:?}", master_port);
    Ok(())
}

#[test]
fn resource_list_omits_ui_service_when_disabled() -> Result<()> {
    let deployer = ClusterDeployer::new(IMAGE);
    let objects = deployer.resource_list(
        &cluster(SparkClusterSpec {
            spark_web_ui: false,
            ..Default::default()
        }),
        false,
    );

    assert!(objects.services.len() == 1, "expected only the master service, got {}", objects.services.len());
    Ok(())
}

#[test]
fn resource_list_labels_objects_for_selection() -> Result<()> {
    let deployer = ClusterDeployer::new(IMAGE);
    let objects = deployer.resource_list(&cluster(Default::default()), false);
    let defaults = deployer.default_labels("my-spark");

    for rc in objects.replication_controllers.iter() {
        let labels = rc.metadata.labels.clone().unwrap_or_default();
        for (key, val) in defaults.iter() {
            assert!(labels.get(key) == Some(val), "expected rc {:?} to carry label {}={}", rc.metadata.name, key, val);
        }
    }
    for svc in objects.services.iter() {
        let labels = svc.metadata.labels.clone().unwrap_or_default();
        for (key, val) in defaults.iter() {
            assert!(labels.get(key) == Some(val), "expected service {:?} to carry label {}={}", svc.metadata.name, key, val);
        }
    }

    let worker = find_rc(&objects, "my-spark-w")?;
    let labels = worker.metadata.labels.clone().unwrap_or_default();
    for (key, val) in deployer.worker_selector_labels().iter() {
        assert!(labels.get(key) == Some(val), "expected worker rc to match worker selector on {}={}", key, val);
    }
    assert!(labels.get(&cluster_name_label()).map(String::as_str) == Some("my-spark"), "expected worker rc to carry the cluster name");
    assert!(labels.get(LABEL_KIND).map(String::as_str) == Some("sparkcluster"), "unexpected kind label");
    assert!(labels.get(LABEL_RC_TYPE).map(String::as_str) == Some(ROLE_WORKER), "unexpected rc type label");
    Ok(())
}

#[test]
fn resource_list_uses_custom_image_over_default() -> Result<()> {
    let deployer = ClusterDeployer::new(IMAGE);
    let objects = deployer.resource_list(&cluster(Default::default()), false);
    let image = primary(find_rc(&objects, "my-spark-m")?)?.image.clone();
    assert!(image.as_deref() == Some(IMAGE), "expected default image, got {:?}", image);

    let objects = deployer.resource_list(
        &cluster(SparkClusterSpec {
            custom_image: Some("my/spark:custom".into()),
            ..Default::default()
        }),
        false,
    );
    let image = primary(find_rc(&objects, "my-spark-w")?)?.image.clone();
    assert!(image.as_deref() == Some("my/spark:custom"), "expected custom image, got {:?}", image);
    Ok(())
}

#[test]
fn worker_env_points_at_master() -> Result<()> {
    let deployer = ClusterDeployer::new(IMAGE);
    let objects = deployer.resource_list(
        &cluster(SparkClusterSpec {
            env: vec![NameValue { name: "FOO".into(), value: "bar".into() }],
            ..Default::default()
        }),
        false,
    );
    let env = primary(find_rc(&objects, "my-spark-w")?)?.env.clone().unwrap_or_default();
    let value_of = |name: &str| env.iter().find(|var| var.name == name).and_then(|var| var.value.clone());

    assert!(value_of("SPARK_MASTER_ADDRESS").as_deref() == Some("spark://my-spark:7077"), "unexpected master address");
    assert!(value_of("SPARK_MASTER_UI_ADDRESS").as_deref() == Some("http://my-spark-ui:8080"), "unexpected master ui address");
    assert!(value_of("FOO").as_deref() == Some("bar"), "expected user env to be passed through");
    Ok(())
}

#[test]
fn probes_use_expected_delay() -> Result<()> {
    let deployer = ClusterDeployer::new(IMAGE);
    let objects = deployer.resource_list(&cluster(Default::default()), false);

    let master = primary(find_rc(&objects, "my-spark-m")?)?;
    let probe = master.readiness_probe.as_ref().context("expected a readiness probe")?;
    assert!(probe.initial_delay_seconds == Some(5), "unexpected master delay {:?}", probe.initial_delay_seconds);
    let port = probe.http_get.as_ref().map(|get| get.port.clone());
    assert!(port == Some(IntOrString::Int(SPARK_MASTER_UI_PORT)), "unexpected master probe port {:?}", port);

    let worker = primary(find_rc(&objects, "my-spark-w")?)?;
    let probe = worker.liveness_probe.as_ref().context("expected a liveness probe")?;
    assert!(probe.initial_delay_seconds == Some(9), "unexpected worker delay {:?}", probe.initial_delay_seconds);
    Ok(())
}

#[test]
fn role_resources_become_requests_and_limits() -> Result<()> {
    let deployer = ClusterDeployer::new(IMAGE);
    let mut spec = SparkClusterSpec::default();
    spec.worker.cpu = Some("2".into());
    spec.worker.memory = Some("1Gi".into());
    let objects = deployer.resource_list(&cluster(spec), false);

    let worker = primary(find_rc(&objects, "my-spark-w")?)?;
    let resources = worker.resources.as_ref().context("expected worker resources")?;
    assert!(resources.limits == resources.requests, "expected requests to equal limits");
    let cpu = resources.limits.as_ref().and_then(|limits| limits.get("cpu")).map(|q| q.0.as_str());
    assert!(cpu == Some("2"), "unexpected cpu limit {:?}", cpu);

    let master = primary(find_rc(&objects, "my-spark-m")?)?;
    assert!(master.resources.is_none(), "expected no master resources when none are declared");
    Ok(())
}

#[test]
fn init_containers_follow_spec() -> Result<()> {
    let deployer = ClusterDeployer::new(IMAGE);

    let objects = deployer.resource_list(&cluster(Default::default()), false);
    let names = init_container_names(find_rc(&objects, "my-spark-m")?)?;
    assert!(names.is_empty(), "expected no init containers for a bare cluster, got {:?}", names);

    let objects = deployer.resource_list(
        &cluster(SparkClusterSpec {
            download_data: vec![DownloadDatum { url: "http://x/f.tar".into(), to: "/tmp/".into() }],
            ..Default::default()
        }),
        false,
    );
    let rc = find_rc(&objects, "my-spark-w")?;
    let names = init_container_names(rc)?;
    assert!(names == vec!["downloader"], "unexpected init containers {:?}", names);
    let downloader = &pod_spec(rc)?.init_containers.as_ref().context("expected init containers")?[0];
    let args = downloader.args.clone().unwrap_or_default();
    assert!(args == vec!["wget http://x/f.tar -P /tmp/ ; ".to_string()], "unexpected downloader args {:?}", args);

    let objects = deployer.resource_list(
        &cluster(SparkClusterSpec {
            download_data: vec![DownloadDatum { url: "http://x/f.tar".into(), to: "/tmp/".into() }],
            spark_configuration: vec![NameValue { name: "spark.a".into(), value: "1".into() }],
            ..Default::default()
        }),
        true,
    );
    let rc = find_rc(&objects, "my-spark-m")?;
    let names = init_container_names(rc)?;
    assert!(names == vec!["downloader", "backup-config", "override-config"], "unexpected init containers {:?}", names);

    let mount_paths: Vec<String> = primary(rc)?
        .volume_mounts
        .as_ref()
        .map(|mounts| mounts.iter().map(|m| m.mount_path.clone()).collect())
        .unwrap_or_default();
    for path in ["/tmp/", "/tmp/config/new", "/opt/spark/conf"] {
        assert!(mount_paths.iter().any(|p| p == path), "expected primary container to mount {}, got {:?}", path, mount_paths);
    }
    let volumes: Vec<String> = pod_spec(rc)?
        .volumes
        .as_ref()
        .map(|volumes| volumes.iter().map(|v| v.name.clone()).collect())
        .unwrap_or_default();
    assert!(volumes.iter().any(|v| v == "configmap-dir"), "expected the override config map volume, got {:?}", volumes);
    Ok(())
}

#[test]
fn rc_names_carry_role_suffix() {
    assert!(master_rc_name("a") == "a-m", "unexpected master rc name");
    assert!(worker_rc_name("a") == "a-w", "unexpected worker rc name");
    assert!(cluster_name_label() == "radanalytics.io/sparkcluster", "unexpected cluster name label");
}

#[test]
fn oversized_worker_count_saturates() -> Result<()> {
    let deployer = ClusterDeployer::new(IMAGE);
    let mut spec = SparkClusterSpec::default();
    spec.worker.instances = u32::MAX;
    let objects = deployer.resource_list(&cluster(spec), false);

    let replicas = find_rc(&objects, "my-spark-w")?.spec.as_ref().and_then(|spec| spec.replicas);
    assert!(replicas == Some(i32::MAX), "expected replicas to saturate at i32::MAX, got {:?}", replicas);
    Ok(())
}
