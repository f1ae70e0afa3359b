use std::time::Duration;

use kube::runtime::watcher::Event;

use crate::k8s::reconciler::ClusterEvent;
use crate::k8s::records::{parse_records, DeclaredRecord};
use crate::k8s::{Controller, EventResult};

//////////////////////////////////////////////////////////////////////////////
// Cluster Record Events /////////////////////////////////////////////////////
impl<R: DeclaredRecord> Controller<R> {
    /// Handle a cluster record watcher event.
    #[tracing::instrument(level = "debug", skip(self, res))]
    pub(super) async fn handle_record_event(&mut self, res: EventResult<R>) {
        let event = match res {
            Ok(event) => event,
            Err(err) => {
                tracing::error!(error = ?err, "error from cluster record k8s watcher");
                tokio::time::sleep(Duration::from_secs(10)).await;
                return;
            }
        };
        match event {
            Event::Applied(obj) => self.record_applied(obj).await,
            Event::Deleted(obj) => self.record_deleted(obj).await,
            Event::Restarted(objs) => self.records_restarted(objs).await,
        }
    }

    #[tracing::instrument(level = "debug", skip(self, record))]
    async fn record_applied(&mut self, record: R) {
        if !record.is_declared_record() {
            return;
        }
        let cluster = match record.parse() {
            Ok(cluster) => cluster,
            Err(err) => {
                tracing::error!(error = ?err, name = ?record.record_name(), "error parsing cluster record");
                return;
            }
        };
        if let Some(event) = self.reconciler.classify_applied(cluster) {
            self.dispatch(event).await;
        }
    }

    #[tracing::instrument(level = "debug", skip(self, record))]
    async fn record_deleted(&mut self, record: R) {
        if !record.is_declared_record() {
            return;
        }
        let name = match record.record_name() {
            Some(name) => name,
            None => return, // Not actually possible as K8s requires name.
        };
        let namespace = record.meta().namespace.clone().unwrap_or_default();
        let event = self.reconciler.classify_deleted(name, &namespace);
        self.dispatch(event).await;
    }

    #[tracing::instrument(level = "debug", skip(self, records))]
    async fn records_restarted(&mut self, records: Vec<R>) {
        let clusters = parse_records(&records);
        for event in self.reconciler.classify_restarted(clusters) {
            self.dispatch(event).await;
        }
    }

    /// Hand the given event to the reconciler, logging any failure.
    ///
    /// Failed events are not retried; the next event or full reconciliation converges the cluster.
    async fn dispatch(&mut self, event: ClusterEvent) {
        if let Err(err) = self.reconciler.handle_event(event).await {
            tracing::error!(error = ?err, "error handling cluster event");
        }
    }
}
