use anyhow::Result;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::ObjectMeta;
use maplit::btreemap;

use super::records::*;
use oshinko_core::{CM_CONFIG_KEY, LABEL_KIND, SPARK_CLUSTER_KIND};

fn config_map(name: &str, labelled: bool, config: &str) -> ConfigMap {
    ConfigMap {
        metadata: ObjectMeta {
            name: Some(name.into()),
            namespace: Some("spark".into()),
            labels: labelled.then(|| btreemap! { LABEL_KIND.to_string() => SPARK_CLUSTER_KIND.to_string() }),
            ..Default::default()
        },
        data: Some(btreemap! { CM_CONFIG_KEY.to_string() => config.to_string() }),
        ..Default::default()
    }
}

#[test]
fn parse_records_skips_foreign_and_malformed_records() -> Result<()> {
    let records = vec![
        config_map("good", true, "worker:\n  instances: 2\n"),
        config_map("unlabelled", false, "worker:\n  instances: 2\n"),
        config_map("malformed", true, "worker: [nope"),
    ];

    let clusters = parse_records(&records);

    let names: Vec<_> = clusters.iter().map(|cluster| cluster.name.as_str()).collect();
    assert!(names == vec!["good"], "expected only the well-formed cluster record, got {:?}", names);
    assert!(clusters[0].worker_instances() == 2, "unexpected worker instances {}", clusters[0].worker_instances());
    assert!(clusters[0].namespace == "spark", "unexpected namespace {}", clusters[0].namespace);
    Ok(())
}

#[test]
fn config_map_records_select_on_kind_label() -> Result<()> {
    let params = <ConfigMap as DeclaredRecord>::list_params();
    assert!(
        params.label_selector.as_deref() == Some("radanalytics.io/kind=SparkCluster"),
        "unexpected label selector {:?}",
        params.label_selector
    );
    Ok(())
}
