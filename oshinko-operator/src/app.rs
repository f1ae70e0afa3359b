use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::stream::{FuturesUnordered, StreamExt};
use k8s_openapi::api::core::v1::ConfigMap;
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::{BroadcastStream, SignalStream};
use tokio_stream::StreamMap;

use crate::config::Config;
use crate::k8s::Controller;
use crate::server::spawn_http_server;
use oshinko_core::crd::SparkCluster;

/// The API group whose presence identifies an OpenShift cluster.
const OPENSHIFT_ROUTE_GROUP: &str = "route.openshift.io";

/// The application object of the operator.
pub struct App {
    /// The application's runtime config.
    _config: Arc<Config>,

    /// A channel used for triggering graceful shutdown.
    shutdown_tx: broadcast::Sender<()>,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The join handle of the HTTP server.
    server: JoinHandle<Result<()>>,
    /// The join handles of the K8s controllers, one per watched namespace.
    controllers: FuturesUnordered<JoinHandle<Result<()>>>,
}

impl App {
    /// Create a new instance.
    pub async fn new(config: Arc<Config>, metrics: Option<PrometheusHandle>) -> Result<Self> {
        // App shutdown channel.
        let (shutdown_tx, shutdown_rx) = broadcast::channel(10);

        // Initialize K8s client.
        let client = kube::Client::try_default().await.context("error initializing K8s client")?;
        let is_openshift = detect_openshift(&client).await?;
        tracing::info!(is_openshift, "detected cluster environment");

        // Spawn various core tasks.
        let server = spawn_http_server(config.clone(), metrics, shutdown_tx.subscribe());
        let controllers = FuturesUnordered::new();
        for namespace in config.watched_namespace.iter() {
            tracing::info!(%namespace, crd = config.crd, "spawning controller");
            let handle = if config.crd {
                Controller::<SparkCluster>::new(client.clone(), config.clone(), namespace.clone(), shutdown_tx.clone()).spawn()
            } else {
                Controller::<ConfigMap>::new(client.clone(), config.clone(), namespace.clone(), shutdown_tx.clone()).spawn()
            };
            controllers.push(handle);
        }

        Ok(Self {
            _config: config,
            shutdown_rx: BroadcastStream::new(shutdown_rx),
            shutdown_tx,
            server,
            controllers,
        })
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) -> Result<()> {
        let mut signals = StreamMap::new();
        signals.insert("sigterm", SignalStream::new(signal(SignalKind::terminate()).context("error building signal stream")?));
        signals.insert("sigint", SignalStream::new(signal(SignalKind::interrupt()).context("error building signal stream")?));

        let mut failed = false;
        let mut server_exited = false;
        loop {
            tokio::select! {
                Some((_, sig)) = signals.next() => {
                    tracing::debug!(signal = ?sig, "signal received, beginning graceful shutdown");
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                Some(res) = self.controllers.next() => {
                    // Controllers only exit on their own when something went wrong.
                    tracing::error!(result = ?flatten_join(res), "k8s controller exited unexpectedly, shutting down");
                    failed = true;
                    let _ = self.shutdown_tx.send(());
                    break;
                }
                res = &mut self.server, if !server_exited => {
                    server_exited = true;
                    if let Err(err) = flatten_join(res) {
                        tracing::error!(error = ?err, "error from http server, shutting down");
                        failed = true;
                        let _ = self.shutdown_tx.send(());
                        break;
                    }
                }
                _ = self.shutdown_rx.next() => break,
            }
        }

        // Begin shutdown routine.
        tracing::debug!("Oshinko Operator is shutting down");
        if !server_exited {
            if let Err(err) = flatten_join(self.server.await) {
                tracing::error!(error = ?err, "error shutting down http server");
            }
        }
        while let Some(res) = self.controllers.next().await {
            if let Err(err) = flatten_join(res) {
                tracing::error!(error = ?err, "error shutting down k8s controller");
                failed = true;
            }
        }

        tracing::debug!("Oshinko Operator shutdown complete");
        if failed {
            bail!("operator stopped due to a failed task");
        }
        Ok(())
    }
}

/// Check whether the cluster serves OpenShift's route API group.
async fn detect_openshift(client: &kube::Client) -> Result<bool> {
    let groups = client.list_api_groups().await.context("error listing API groups for environment detection")?;
    Ok(groups.groups.iter().any(|group| group.name == OPENSHIFT_ROUTE_GROUP))
}

fn flatten_join(res: std::result::Result<Result<()>, tokio::task::JoinError>) -> Result<()> {
    res.context("error joining task handle").and_then(|res| res)
}
