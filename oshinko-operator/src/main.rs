//! The Oshinko operator, which manages Spark clusters on Kubernetes.

mod app;
mod config;
mod k8s;
mod server;

use std::io::Write;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::prelude::*;

use crate::app::App;
use crate::config::Config;
use oshinko_core::prom::register_operator_metrics;

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = Arc::new(Config::new()?);

    // Setup tracing/logging system.
    let filter = tracing_subscriber::EnvFilter::try_new(&cfg.rust_log).context("error parsing RUST_LOG directives")?;
    tracing_subscriber::registry()
        // Filter spans based on the RUST_LOG config, defaulting to `info`.
        .with(filter)
        // Send a copy of all spans to stdout in compact form.
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_ansi(true)
        )
        // Install this registry as the global tracing registry.
        .try_init()
        .context("error initializing logging/tracing system")?;

    let metrics = if cfg.metrics { Some(install_metrics_recorder()?) } else { None };

    tracing::info!(
        namespaces = ?cfg.watched_namespace,
        crd = cfg.crd,
        metrics = cfg.metrics,
        "starting Oshinko Operator",
    );
    let res = App::new(cfg, metrics).await;
    let res = match res {
        Ok(app) => app.spawn().await.context("error joining app task").and_then(|res| res),
        Err(err) => Err(err),
    };
    if let Err(err) = &res {
        tracing::error!(error = ?err);
    }

    // Ensure any pending output is flushed.
    let _ = std::io::stdout().flush();
    let _ = std::io::stderr().flush();

    res
}

/// Install the global Prometheus metrics recorder & register all operator metrics.
fn install_metrics_recorder() -> Result<PrometheusHandle> {
    let recorder = PrometheusBuilder::new().build();
    let handle = recorder.handle();
    metrics::set_boxed_recorder(Box::new(recorder)).context("error setting prometheus metrics recorder")?;
    register_operator_metrics();
    Ok(handle)
}
