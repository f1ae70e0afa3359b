//! Init-container chain of Spark cluster pods.
//!
//! Depending on the cluster spec, up to three init containers are added to a pod, in order:
//!
//! - `downloader` fetches the cluster's download data, when any is declared.
//! - `backup-config` copies the image's default Spark configuration into a scratch volume.
//! - `override-config` layers the override config map's files and then the inline key/value
//!   overrides on top of the backup, and finally copies the result over the default config path.
//!
//! The latter two are always added together, when an override config map exists or when inline
//! overrides are declared. Every init container's volume is also mounted into the primary
//! container, so Spark sees the merged configuration at its default path.

use k8s_openapi::api::core::v1::{ConfigMapVolumeSource, Container, EmptyDirVolumeSource, PodSpec, Volume, VolumeMount};

use oshinko_core::ClusterInfo;

/// The image used by the helper init containers.
pub const HELPER_IMAGE: &str = "busybox";

/// The volume & path holding downloaded data.
const DATA_DIR: &str = "data-dir";
const DATA_DIR_PATH: &str = "/tmp/";
/// The volume & path holding the configuration being assembled.
const NEW_CONF_DIR: &str = "conf-new-dir";
const NEW_CONF_DIR_PATH: &str = "/tmp/config/new";
/// The volume shadowing the image's default configuration path.
const ORIG_CONF_DIR: &str = "conf-orig-dir";
const DEFAULT_CONF_DIR_PATH: &str = "/opt/spark/conf";
/// The volume & path of the override config map.
const CM_DIR: &str = "configmap-dir";
const CM_DIR_PATH: &str = "/tmp/config/fromCM";

/// Base probe delay in seconds.
const DELAY_BASE: i32 = 5;
/// Extra probe delay of workers, whose readiness depends on the master.
const DELAY_WORKER_PENALTY: i32 = 4;
/// Extra probe delay when an override config map exists.
const DELAY_CONFIG_MAP: i32 = 3;
/// Extra probe delay when inline overrides are declared.
const DELAY_INLINE_CONFIG: i32 = 3;
/// Extra probe delay per download entry.
const DELAY_PER_DOWNLOAD: i32 = 4;

/// Add the init containers needed by the given cluster to the given pod spec.
///
/// The pod spec's first container is treated as the primary container.
pub fn add_init_containers(pod_spec: &mut PodSpec, cluster: &ClusterInfo, image: &str, cm_exists: bool) {
    if !cluster.spec.download_data.is_empty() {
        add_downloader(pod_spec, cluster);
    }
    if cm_exists || !cluster.spec.spark_configuration.is_empty() {
        add_backup_config(pod_spec, image);
        add_override_config(pod_spec, cluster, cm_exists);
    }
}

/// The name of the config map expected to hold configuration overrides for the given cluster.
pub fn expected_cm_name(cluster: &ClusterInfo) -> String {
    cluster
        .spec
        .spark_configuration_map
        .clone()
        .unwrap_or_else(|| format!("{}-config", cluster.name))
}

/// The expected initial delay in seconds of the readiness & liveness probes of a role.
///
/// Slow cpus, downloads & config layering all delay the point at which Spark is up. An
/// unparsable or non-positive cpu value is ignored.
pub fn expected_delay(cluster: &ClusterInfo, cm_exists: bool, is_master: bool) -> i32 {
    let role = if is_master { &cluster.spec.master } else { &cluster.spec.worker };
    let mut delay = DELAY_BASE;
    if let Some(cpu) = role.cpu.as_deref().and_then(|cpu| cpu.trim().parse::<f64>().ok()) {
        if cpu.is_finite() && cpu > 0.0 {
            delay = (delay as f64 + (1.0 / cpu) * 3.0) as i32;
        }
    }
    if !is_master {
        delay += DELAY_WORKER_PENALTY;
    }
    if cm_exists {
        delay += DELAY_CONFIG_MAP;
    }
    if !cluster.spec.spark_configuration.is_empty() {
        delay += DELAY_INLINE_CONFIG;
    }
    let downloads = i32::try_from(cluster.spec.download_data.len()).unwrap_or(i32::MAX);
    delay.saturating_add(downloads.saturating_mul(DELAY_PER_DOWNLOAD))
}

/// The shell command of the downloader init container.
///
/// A target ending with `/` is a directory, so `-P` sets the prefix; otherwise `-O` names the file.
pub fn downloader_command(cluster: &ClusterInfo) -> String {
    cluster
        .spec
        .download_data
        .iter()
        .map(|dl| {
            let param = if dl.to.ends_with('/') { "-P" } else { "-O" };
            format!("wget {} {} {} ; ", dl.url, param, dl.to)
        })
        .collect()
}

/// The shell command of the override-config init container.
///
/// Config map files are copied before the inline overrides are appended, so inline overrides
/// win. The merged directory is always copied back over the default path last.
pub fn override_config_command(cluster: &ClusterInfo, cm_exists: bool) -> String {
    let mut steps = vec![];
    if cm_exists {
        steps.push(format!("cp -r {}/* {}", CM_DIR_PATH, NEW_CONF_DIR_PATH));
    }
    let config = &cluster.spec.spark_configuration;
    if !config.is_empty() {
        let lines: String = config.iter().map(|kv| format!("{} {}\\n", kv.name, kv.value)).collect();
        steps.push(format!("echo -e \"{}\" >> {}/spark-defaults.conf", lines, NEW_CONF_DIR_PATH));
    }
    format!("{} && cp -r {}/* {}", steps.join(" ; "), NEW_CONF_DIR_PATH, DEFAULT_CONF_DIR_PATH)
}

fn add_downloader(pod_spec: &mut PodSpec, cluster: &ClusterInfo) {
    let mount = volume_mount(DATA_DIR, DATA_DIR_PATH);
    let downloader = Container {
        name: "downloader".into(),
        image: Some(HELPER_IMAGE.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        command: Some(vec!["/bin/sh".into(), "-xc".into()]),
        args: Some(vec![downloader_command(cluster)]),
        volume_mounts: Some(vec![mount.clone()]),
        ..Default::default()
    };
    attach(pod_spec, downloader, empty_dir_volume(DATA_DIR), mount);
}

fn add_backup_config(pod_spec: &mut PodSpec, image: &str) {
    let mount = volume_mount(NEW_CONF_DIR, NEW_CONF_DIR_PATH);
    // Runs on the cluster's own image so the backup is the config Spark would otherwise see.
    let backup = Container {
        name: "backup-config".into(),
        image: Some(image.into()),
        command: Some(vec!["/bin/sh".into(), "-xc".into()]),
        args: Some(vec![format!("cp -r {}/* {}", DEFAULT_CONF_DIR_PATH, NEW_CONF_DIR_PATH)]),
        volume_mounts: Some(vec![mount.clone()]),
        ..Default::default()
    };
    attach(pod_spec, backup, empty_dir_volume(NEW_CONF_DIR), mount);
}

fn add_override_config(pod_spec: &mut PodSpec, cluster: &ClusterInfo, cm_exists: bool) {
    let mut mounts = Vec::with_capacity(3);
    if cm_exists {
        pod_spec.volumes.get_or_insert_with(Default::default).push(Volume {
            name: CM_DIR.into(),
            config_map: Some(ConfigMapVolumeSource {
                name: Some(expected_cm_name(cluster)),
                ..Default::default()
            }),
            ..Default::default()
        });
        mounts.push(volume_mount(CM_DIR, CM_DIR_PATH));
    }
    let orig_conf_mount = volume_mount(ORIG_CONF_DIR, DEFAULT_CONF_DIR_PATH);
    mounts.push(volume_mount(NEW_CONF_DIR, NEW_CONF_DIR_PATH));
    mounts.push(orig_conf_mount.clone());

    let override_config = Container {
        name: "override-config".into(),
        image: Some(HELPER_IMAGE.into()),
        image_pull_policy: Some("IfNotPresent".into()),
        command: Some(vec!["/bin/sh".into(), "-xc".into()]),
        args: Some(vec![override_config_command(cluster, cm_exists)]),
        volume_mounts: Some(mounts),
        ..Default::default()
    };
    attach(pod_spec, override_config, empty_dir_volume(ORIG_CONF_DIR), orig_conf_mount);
}

/// Append an init container & its volume, mounting the volume into the primary container too.
fn attach(pod_spec: &mut PodSpec, init_container: Container, volume: Volume, primary_mount: VolumeMount) {
    if let Some(primary) = pod_spec.containers.first_mut() {
        primary.volume_mounts.get_or_insert_with(Default::default).push(primary_mount);
    }
    pod_spec.volumes.get_or_insert_with(Default::default).push(volume);
    pod_spec.init_containers.get_or_insert_with(Default::default).push(init_container);
}

fn volume_mount(name: &str, path: &str) -> VolumeMount {
    VolumeMount {
        name: name.into(),
        mount_path: path.into(),
        ..Default::default()
    }
}

fn empty_dir_volume(name: &str) -> Volume {
    Volume {
        name: name.into(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}
