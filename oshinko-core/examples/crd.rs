//! Print the SparkCluster CRD as YAML.
//!
//! Run this whenever the CRD spec changes and apply the output to the cluster, e.g.
//! `cargo run --example crd | kubectl apply -f -`.

use anyhow::{Context, Result};
use kube::CustomResourceExt;
use oshinko_core::crd::SparkCluster;

fn main() -> Result<()> {
    let crd = SparkCluster::crd();
    let yaml = serde_yaml::to_string(&crd).context("error serializing SparkCluster CRD to yaml")?;
    print!("{}", yaml);
    Ok(())
}
