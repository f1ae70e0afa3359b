//! Scale-vs-recreate decisions for changed cluster specs.

use oshinko_core::ClusterInfo;

/// The action needed to move a deployed cluster to a new spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Only the worker count changed; scale the worker replication controller in place.
    Scale(u32),
    /// Anything else changed; replace the cluster's full object set.
    Recreate,
}

/// Decide how to move a cluster deployed with `old` to `new`.
///
/// A change is a scale only when the worker count differs and the new spec, with the old worker
/// count put back, is structurally equal to the old spec.
pub fn decide(old: &ClusterInfo, new: &ClusterInfo) -> Action {
    let count_differs = old.worker_instances() != new.worker_instances();
    if count_differs && &new.with_worker_instances(old.worker_instances()) == old {
        Action::Scale(new.worker_instances())
    } else {
        Action::Recreate
    }
}
