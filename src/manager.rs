//! Shared reconciler context and error policy.
//!
//! Grounded on the teacher's `manager.rs` (`Data` context +
//! `error_policy`), updated to the `kube::runtime::controller::Action`
//! vocabulary used across the grounding corpus (e.g. the `DiskPool` operator's
//! `error_policy`).

use std::sync::Arc;
use std::time::Duration;

use kube::runtime::controller::Action;
use kube::Client;
use tracing::warn;

use crate::config::Config;
use crate::consts::DEFAULT_REQUEUE;
use crate::error::Error;

/// Context threaded through every reconciliation. Holds only a cluster client
/// handle and static config — no mutable cross-reconciliation state is kept,
/// per spec.md §5's "shared resource policy".
pub struct Context {
    pub client: Client,
    pub config: Config,
}

pub fn error_policy<K>(_object: Arc<K>, error: &Error, _ctx: Arc<Context>) -> Action {
    warn!(error = %error, "reconcile failed, requeuing");
    Action::requeue(DEFAULT_REQUEUE)
}

/// A small shared capability set implemented by both reconcilers, per spec.md
/// §9's "Dynamic dispatch" design note: two concrete structs sharing shape,
/// not an open-ended plugin hierarchy.
pub trait Reconciler {
    type Object;

    fn kind() -> &'static str;
}

/// Marker type for the Machine Reconciler (`controllers::machine::reconcile`).
pub struct MachineReconciler;

impl Reconciler for MachineReconciler {
    type Object = crate::api::machine::Machine;

    fn kind() -> &'static str {
        "Machine"
    }
}

/// Marker type for the Pool Reconciler (`controllers::pool::reconcile`).
pub struct PoolReconciler;

impl Reconciler for PoolReconciler {
    type Object = crate::api::machine_node_pool::MachineNodePool;

    fn kind() -> &'static str {
        "MachineNodePool"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requeue_duration_matches_default() {
        assert_eq!(DEFAULT_REQUEUE, Duration::from_secs(30));
    }

    #[test]
    fn reconciler_kinds_match_their_crds() {
        assert_eq!(MachineReconciler::kind(), "Machine");
        assert_eq!(PoolReconciler::kind(), "MachineNodePool");
    }
}
