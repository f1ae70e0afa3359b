//! Runtime configuration.

use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer};

/// Runtime configuration data.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    /// The server's logging config, which uses Rust's `env_logger` directives.
    #[serde(default = "Config::default_rust_log")]
    pub rust_log: String,
    /// The port used for the HTTP healthcheck & metrics server.
    #[serde(default = "Config::default_http_port")]
    pub http_port: u16,

    /// The namespaces to watch; a single `*` means all namespaces.
    #[serde(default = "Config::default_watched_namespace", deserialize_with = "Config::parse_namespaces")]
    pub watched_namespace: Vec<String>,
    /// The interval in milliseconds between two full reconciliations.
    #[serde(default = "Config::default_reconciliation_interval")]
    pub reconciliation_interval: u64,
    /// The image of clusters which do not declare one.
    #[serde(default = "Config::default_spark_cluster_image")]
    pub default_spark_cluster_image: String,

    /// Watch `SparkCluster` custom resources when true, else labelled config maps.
    #[serde(default = "Config::default_crd")]
    pub crd: bool,
    /// Serve Prometheus metrics.
    #[serde(default)]
    pub metrics: bool,
}

impl Config {
    /// Create a new config instance.
    ///
    /// Currently this routine just parses the runtime environment and builds the application
    /// config from that.
    #[allow(clippy::new_without_default)]
    pub fn new() -> Result<Self> {
        envy::from_env().context("error building config from env")
    }

    /// The interval between two full reconciliations.
    pub fn reconciliation_interval(&self) -> Duration {
        // A zero interval would make the tick stream panic.
        Duration::from_millis(self.reconciliation_interval.max(1))
    }

    fn default_rust_log() -> String {
        "info".into()
    }

    fn default_http_port() -> u16 {
        8080
    }

    fn default_watched_namespace() -> Vec<String> {
        vec!["default".into()]
    }

    fn default_reconciliation_interval() -> u64 {
        180_000
    }

    fn default_spark_cluster_image() -> String {
        "quay.io/radanalyticsio/openshift-spark:2.4-latest".into()
    }

    fn default_crd() -> bool {
        true
    }

    /// Parse a comma-separated list of namespaces, ignoring blank entries.
    fn parse_namespaces<'de, D: Deserializer<'de>>(val: D) -> Result<Vec<String>, D::Error> {
        let raw: String = Deserialize::deserialize(val)?;
        let mut namespaces: Vec<String> = raw
            .split(',')
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .map(String::from)
            .collect();
        namespaces.dedup();
        if namespaces.is_empty() {
            namespaces = Self::default_watched_namespace();
        }
        Ok(namespaces)
    }
}
