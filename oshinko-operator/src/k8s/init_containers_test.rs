use anyhow::Result;

use super::init_containers::*;
use oshinko_core::crd::{DownloadDatum, NameValue, SparkClusterSpec};
use oshinko_core::ClusterInfo;

fn cluster(spec: SparkClusterSpec) -> ClusterInfo {
    ClusterInfo::new("my-spark", "spark", spec)
}

fn inline_config() -> Vec<NameValue> {
    vec![
        NameValue { name: "spark.a".into(), value: "1".into() },
        NameValue { name: "spark.b".into(), value: "2".into() },
    ]
}

#[test]
fn downloader_command_picks_flag_by_target() -> Result<()> {
    let cluster = cluster(SparkClusterSpec {
        download_data: vec![
            DownloadDatum { url: "http://x/f.tar".into(), to: "/tmp/".into() },
            DownloadDatum { url: "http://x/g.csv".into(), to: "/tmp/data.csv".into() },
        ],
        ..Default::default()
    });

    let cmd = downloader_command(&cluster);
    assert!(
        cmd == "wget http://x/f.tar -P /tmp/ ; wget http://x/g.csv -O /tmp/data.csv ; ",
        "unexpected downloader command: {}",
        cmd
    );
    Ok(())
}

#[test]
fn override_command_copies_config_map_before_inline_overrides() -> Result<()> {
    let cluster = cluster(SparkClusterSpec {
        spark_configuration: inline_config(),
        ..Default::default()
    });

    let cmd = override_config_command(&cluster, true);
    let cm_copy = cmd.find("cp -r /tmp/config/fromCM/* /tmp/config/new");
    let echo = cmd.find("echo -e \"spark.a 1\\nspark.b 2\\n\" >> /tmp/config/new/spark-defaults.conf");
    let final_copy = cmd.rfind("&& cp -r /tmp/config/new/* /opt/spark/conf");
    assert!(cm_copy.is_some() && echo.is_some() && final_copy.is_some(), "missing step in override command: {}", cmd);
    assert!(cm_copy < echo, "expected config map copy before inline overrides: {}", cmd);
    assert!(echo < final_copy, "expected final copy to come last: {}", cmd);
    assert!(cmd.ends_with("cp -r /tmp/config/new/* /opt/spark/conf"), "expected final copy at the very end: {}", cmd);
    Ok(())
}

#[test]
fn override_command_without_config_map() -> Result<()> {
    let cluster = cluster(SparkClusterSpec {
        spark_configuration: inline_config(),
        ..Default::default()
    });

    let cmd = override_config_command(&cluster, false);
    assert!(!cmd.contains("fromCM"), "expected no config map copy when the map is absent: {}", cmd);
    assert!(cmd.starts_with("echo -e"), "expected inline overrides to come first: {}", cmd);
    Ok(())
}

#[test]
fn expected_cm_name_prefers_declared_map() -> Result<()> {
    let declared = cluster(SparkClusterSpec {
        spark_configuration_map: Some("overrides".into()),
        ..Default::default()
    });
    assert!(expected_cm_name(&declared) == "overrides", "expected the declared map name");

    let implied = cluster(Default::default());
    assert!(expected_cm_name(&implied) == "my-spark-config", "expected the implied map name");
    Ok(())
}

#[test]
fn expected_delay_accumulates_penalties() -> Result<()> {
    let mut spec = SparkClusterSpec {
        download_data: vec![
            DownloadDatum { url: "http://x/a".into(), to: "/tmp/".into() },
            DownloadDatum { url: "http://x/b".into(), to: "/tmp/".into() },
        ],
        spark_configuration: inline_config(),
        ..Default::default()
    };
    spec.worker.cpu = Some("0.5".into());
    let cluster = cluster(spec);

    // 5 + (1 / 0.5) * 3 = 11, then 4 worker + 3 map + 3 inline + 2 * 4 downloads.
    let delay = expected_delay(&cluster, true, false);
    assert!(delay == 29, "unexpected worker delay {}", delay);

    // No master cpu declared: 5 + 3 map + 3 inline + 8 downloads.
    let delay = expected_delay(&cluster, true, true);
    assert!(delay == 19, "unexpected master delay {}", delay);
    Ok(())
}

#[test]
fn expected_delay_is_monotonic_in_inputs() -> Result<()> {
    let base = cluster(Default::default());
    let with_download = cluster(SparkClusterSpec {
        download_data: vec![DownloadDatum { url: "http://x/a".into(), to: "/tmp/".into() }],
        ..Default::default()
    });

    assert!(expected_delay(&base, true, true) > expected_delay(&base, false, true), "config map must add delay");
    assert!(expected_delay(&base, false, false) > expected_delay(&base, false, true), "workers must wait longer");
    assert!(expected_delay(&with_download, false, true) > expected_delay(&base, false, true), "downloads must add delay");
    Ok(())
}

#[test]
fn expected_delay_ignores_unusable_cpu() -> Result<()> {
    for cpu in ["lots", "0", "-1", "500m"] {
        let mut spec = SparkClusterSpec::default();
        spec.master.cpu = Some(cpu.into());
        let delay = expected_delay(&cluster(spec), false, true);
        assert!(delay == 5, "expected cpu {:?} to be ignored, got delay {}", cpu, delay);
    }
    Ok(())
}
