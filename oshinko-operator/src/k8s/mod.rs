//! Kubernetes controller.
//!
//! One controller is spawned per watched namespace. It observes the declarative records of Spark
//! clusters in that namespace and drives the backing replication controllers, services & pods
//! toward the declared state.
//!
//! Watch events and the periodic full reconciliation are handled by a single task, so every
//! read & write of the controller's registry is serialized.

pub mod api;
mod data;
pub mod deployer;
#[cfg(test)]
mod deployer_test;
pub mod init_containers;
#[cfg(test)]
mod init_containers_test;
pub mod policy;
pub mod reconciler;
pub mod records;
#[cfg(test)]
mod records_test;
pub mod registry;

use std::marker::PhantomData;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::prelude::*;
use kube::api::Api;
use kube::client::Client;
use kube::runtime::watcher::{watcher, Error as WatcherError, Event};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::BroadcastStream;

use crate::config::Config;
use crate::k8s::api::{KubeClusterApi, API_TIMEOUT};
use crate::k8s::deployer::ClusterDeployer;
use crate::k8s::reconciler::Reconciler;
use crate::k8s::records::{parse_records, DeclaredRecord};
use oshinko_core::ClusterInfo;

/// The pseudo-namespace denoting all namespaces.
pub const ALL_NAMESPACES: &str = "*";

type EventResult<T> = std::result::Result<Event<T>, WatcherError>;

/// Kubernetes controller for the Spark clusters of one namespace.
pub struct Controller<R: DeclaredRecord> {
    /// K8s client.
    client: Client,
    /// Runtime config.
    config: Arc<Config>,
    /// The watched namespace, or `*` for all namespaces.
    namespace: String,
    /// A channel used for triggering graceful shutdown.
    shutdown_rx: BroadcastStream<()>,

    /// The reconciliation engine, owning the registry of known clusters.
    reconciler: Reconciler<KubeClusterApi>,

    _record: PhantomData<R>,
}

impl<R: DeclaredRecord> Controller<R> {
    /// Create a new instance.
    pub fn new(client: Client, config: Arc<Config>, namespace: String, shutdown_tx: broadcast::Sender<()>) -> Self {
        let deployer = ClusterDeployer::new(config.default_spark_cluster_image.clone());
        let reconciler = Reconciler::new(namespace.clone(), KubeClusterApi::new(client.clone()), deployer);
        Self {
            client,
            config,
            namespace,
            shutdown_rx: BroadcastStream::new(shutdown_tx.subscribe()),
            reconciler,
            _record: PhantomData,
        }
    }

    pub fn spawn(self) -> JoinHandle<Result<()>> {
        tokio::spawn(self.run())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(namespace = %self.namespace))]
    async fn run(mut self) -> Result<()> {
        // The warm-up reconciliation populates the registry before any watch event is handled,
        // so that pre-existing clusters are not treated as new.
        self.run_full_reconciliation().await;

        let records_watcher = watcher(self.records_api(), R::list_params());
        tokio::pin!(records_watcher);
        let interval = self.config.reconciliation_interval();
        let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);

        tracing::info!(namespace = %self.namespace, kind = %R::kind(&()), "k8s controller initialized");
        loop {
            tokio::select! {
                Some(k8s_event_res) = records_watcher.next() => self.handle_record_event(k8s_event_res).await,
                _ = ticks.tick() => self.run_full_reconciliation().await,
                _ = self.shutdown_rx.next() => break,
            }
        }

        tracing::debug!(namespace = %self.namespace, "k8s controller shutdown");
        Ok(())
    }

    /// Run a full reconciliation pass, logging any failure.
    async fn run_full_reconciliation(&mut self) {
        if let Err(err) = self.full_reconciliation().await {
            tracing::error!(error = ?err, namespace = %self.namespace, "error performing full reconciliation");
        }
    }

    /// Fetch all declared clusters & converge the namespace toward them.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn full_reconciliation(&mut self) -> Result<()> {
        let desired = if self.namespace == ALL_NAMESPACES {
            vec![]
        } else {
            self.list_desired().await?
        };
        if let Some(report) = self.reconciler.full_reconciliation(desired).await? {
            tracing::debug!(
                ?report,
                passes = self.reconciler.completed_passes(),
                running = self.reconciler.clusters().len(),
                "full reconciliation complete"
            );
        }
        Ok(())
    }

    /// List all clusters currently declared in the watched namespace.
    async fn list_desired(&self) -> Result<Vec<ClusterInfo>> {
        let records = tokio::time::timeout(API_TIMEOUT, self.records_api().list(&R::list_params()))
            .await
            .context("timeout while listing cluster records")?
            .context("error listing cluster records")?;
        Ok(parse_records(&records.items))
    }

    /// The API of the watched record kind.
    fn records_api(&self) -> Api<R> {
        if self.namespace == ALL_NAMESPACES {
            Api::all(self.client.clone())
        } else {
            Api::namespaced(self.client.clone(), &self.namespace)
        }
    }
}
