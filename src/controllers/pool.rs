//! Pool Reconciler (spec.md §4.1).
//!
//! Converges each Node named in a `MachineNodePool`'s node pool to the
//! assignment policy declared for it, owns the finalizer protocol, and
//! publishes per-node health onto the pool's status.
//!
//! Grounded on
//! `original_source/pkg/controllers/machinenodepool_controller.go`, restructured
//! around `kube::runtime::finalizer` the way the corpus's `DiskPool` operator
//! (`k8s-operators/src/pool/context.rs`) structures its apply/cleanup split.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::runtime::controller::Action;
use kube::runtime::finalizer::{finalizer, Event};
use kube::ResourceExt;
use tracing::{info, instrument};

use crate::api::conditions::{set_condition, ConditionStatus, CONDITION_READY, REASON_FAILURE, REASON_SUCCESS};
use crate::api::machine::NodeMode;
use crate::api::machine_node_pool::{MachineNodePool, NodeCondition, NodePoolCondition};
use crate::consts::{self, machine_type_gating_key, CANNOT_USE_NODE_TAINTS, MACHINE_NODE_POOL_FINALIZER};
use crate::controllers::util::{label, taint};
use crate::error::Error;
use crate::manager::Context;

const STATUS_READY: &str = "ready";
const STATUS_NOT_READY: &str = "not-ready";
const STATUS_MAINTENANCE: &str = "maintenance";

#[instrument(skip(ctx), fields(name = %pool.name_any()))]
pub async fn reconcile(pool: Arc<MachineNodePool>, ctx: Arc<Context>) -> Result<Action, Error> {
    let pools: Api<MachineNodePool> = Api::all(ctx.client.clone());
    finalizer(&pools, MACHINE_NODE_POOL_FINALIZER, pool, |event| async {
        match event {
            Event::Apply(pool) => reconcile_apply(pool, ctx.clone()).await,
            Event::Cleanup(pool) => reconcile_cleanup(pool, ctx.clone()).await,
        }
    })
    .await
    .map_err(|err| Error::Finalizer(Box::new(err)))
}

async fn reconcile_apply(pool: Arc<MachineNodePool>, ctx: Arc<Context>) -> Result<Action, Error> {
    if let Err(err) = converge_nodes(&pool, &ctx).await {
        publish_failure(&pool, &ctx, &err).await.ok();
        return Err(err);
    }
    publish_status(&pool, &ctx).await?;
    Ok(Action::requeue(ctx.config.sync_period))
}

async fn reconcile_cleanup(pool: Arc<MachineNodePool>, ctx: Arc<Context>) -> Result<Action, Error> {
    cleanup_nodes(&pool, &ctx).await?;
    Ok(Action::await_change())
}

/// Computes the `status` value for one node, per spec.md §4.1 step 2.
fn status_value(mode: NodeMode, node_taints: &BTreeMap<String, String>, envtest: bool) -> &'static str {
    if mode == NodeMode::Maintenance {
        return STATUS_MAINTENANCE;
    }
    for cannot_use in CANNOT_USE_NODE_TAINTS {
        if !node_taints.contains_key(cannot_use) {
            continue;
        }
        if envtest && cannot_use == consts::NODE_NOT_READY_TAINT {
            continue;
        }
        return STATUS_NOT_READY;
    }
    STATUS_READY
}

/// Runs the node-convergence algorithm over every node pool entry.
async fn converge_nodes(pool: &MachineNodePool, ctx: &Context) -> Result<(), Error> {
    let nodes: Api<Node> = Api::all(ctx.client.clone());

    for entry in &pool.spec.node_pool {
        let node = nodes.get(&entry.node_name).await.map_err(|_| {
            Error::Validation(format!("node {} not found for pool {}", entry.node_name, pool.spec.machine_group))
        })?;

        let mut new_node = node.clone();
        let existing_taints = node.spec.as_ref().and_then(|s| s.taints.clone()).unwrap_or_default();
        let existing_taint_kv = taint::key_values(&existing_taints);

        let status = status_value(entry.mode, &existing_taint_kv, ctx.config.envtest);
        let gating_key = machine_type_gating_key(&entry.machine_type);

        let mut labels = node.metadata.labels.clone().unwrap_or_default();
        let desired_labels = label::desired_labels(status, &entry.machine_type, &pool.spec.machine_group);
        for (k, v) in &desired_labels {
            labels.insert(k.clone(), v.clone());
        }

        let mut taints = existing_taints.clone();
        if entry.taint {
            let desired = taint::desired_taints(status, &entry.machine_type, &pool.spec.machine_group);
            taint::merge(&mut taints, desired);
        } else {
            taint::strip(&mut taints, &[gating_key], &pool.spec.machine_group);
        }

        let mut annotations = node.metadata.annotations.clone().unwrap_or_default();
        annotations.insert(consts::MACHINE_GROUP_KEY.to_string(), pool.spec.machine_group.clone());

        let labels_unchanged = label::contains_all(&node.metadata.labels.clone().unwrap_or_default(), &desired_labels)
            && node.metadata.labels.as_ref().map(|l| l.len()) == Some(labels.len());
        let taints_unchanged = taint::structurally_equal(&existing_taints, &taints);
        let annotations_unchanged = node.metadata.annotations.as_ref().and_then(|a| a.get(consts::MACHINE_GROUP_KEY))
            == Some(&pool.spec.machine_group);

        if labels_unchanged && taints_unchanged && annotations_unchanged {
            continue;
        }

        new_node.metadata.labels = Some(labels);
        new_node.metadata.annotations = Some(annotations);
        if let Some(spec) = new_node.spec.as_mut() {
            spec.taints = Some(taints);
        }

        nodes.replace(&entry.node_name, &PostParams::default(), &new_node).await?;
        info!(node = %entry.node_name, "converged node assignment");
    }

    Ok(())
}

/// Strips every controller-owned surface from every node named in the pool,
/// per the finalizer protocol in spec.md §4.1 and the "Finalizer completeness"
/// property in §8.
async fn cleanup_nodes(pool: &MachineNodePool, ctx: &Context) -> Result<(), Error> {
    let nodes: Api<Node> = Api::all(ctx.client.clone());

    for entry in &pool.spec.node_pool {
        let node = match nodes.get(&entry.node_name).await {
            Ok(node) => node,
            Err(kube::Error::Api(err)) if err.code == 404 => continue,
            Err(err) => return Err(err.into()),
        };

        let gating_key = machine_type_gating_key(&entry.machine_type);
        let mut new_node = node.clone();

        let mut labels = node.metadata.labels.clone().unwrap_or_default();
        label::strip(&mut labels, &[gating_key.clone()], &pool.spec.machine_group);

        let mut taints = node.spec.as_ref().and_then(|s| s.taints.clone()).unwrap_or_default();
        taint::strip(&mut taints, &[gating_key], &pool.spec.machine_group);

        let mut annotations = node.metadata.annotations.clone().unwrap_or_default();
        if annotations.get(consts::MACHINE_GROUP_KEY) == Some(&pool.spec.machine_group) {
            annotations.remove(consts::MACHINE_GROUP_KEY);
        }

        let unchanged = node.metadata.labels.as_ref().unwrap_or(&BTreeMap::new()) == &labels
            && node.metadata.annotations.as_ref().unwrap_or(&BTreeMap::new()) == &annotations
            && taint::structurally_equal(&node.spec.as_ref().and_then(|s| s.taints.clone()).unwrap_or_default(), &taints);
        if unchanged {
            continue;
        }

        new_node.metadata.labels = Some(labels);
        new_node.metadata.annotations = Some(annotations);
        if let Some(spec) = new_node.spec.as_mut() {
            spec.taints = Some(taints);
        }

        nodes.replace(&entry.node_name, &PostParams::default(), &new_node).await?;
        info!(node = %entry.node_name, "stripped controller-owned node surfaces");
    }

    Ok(())
}

/// Maps each node pool entry to a `NodePoolCondition` and publishes the
/// status if it differs, per spec.md §4.1's "Status publication".
async fn publish_status(pool: &MachineNodePool, ctx: &Context) -> Result<(), Error> {
    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let mut conditions = Vec::with_capacity(pool.spec.node_pool.len());

    for entry in &pool.spec.node_pool {
        let node = nodes.get(&entry.node_name).await?;
        let status_label = node.metadata.labels.as_ref().and_then(|l| l.get(consts::MACHINE_STATUS_KEY)).map(String::as_str);

        let condition = if entry.mode == NodeMode::Maintenance {
            NodeCondition::Maintenance
        } else if status_label == Some(STATUS_READY) {
            NodeCondition::Healthy
        } else {
            NodeCondition::Unhealthy
        };

        conditions.push(NodePoolCondition { node_name: entry.node_name.clone(), condition });
    }

    if conditions == pool.status.as_ref().map(|s| s.node_pool_condition.clone()).unwrap_or_default() {
        return Ok(());
    }

    let mut status = pool.status.clone().unwrap_or_default();
    status.node_pool_condition = conditions;
    set_condition(&mut status.conditions, CONDITION_READY, ConditionStatus::True, REASON_SUCCESS, "reconciled node pool", Utc::now());

    let pools: Api<MachineNodePool> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({ "status": status });
    pools
        .patch_status(&pool.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn publish_failure(pool: &MachineNodePool, ctx: &Context, err: &Error) -> Result<(), Error> {
    let mut status = pool.status.clone().unwrap_or_default();
    set_condition(&mut status.conditions, CONDITION_READY, ConditionStatus::False, REASON_FAILURE, err.to_string(), Utc::now());

    let pools: Api<MachineNodePool> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({ "status": status });
    pools
        .patch_status(&pool.name_any(), &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn maintenance_mode_wins_over_any_taint() {
        let taints = BTreeMap::from([(consts::NODE_NOT_READY_TAINT.to_string(), "".to_string())]);
        assert_eq!(status_value(NodeMode::Maintenance, &taints, false), STATUS_MAINTENANCE);
    }

    #[test]
    fn not_ready_taint_marks_node_not_ready() {
        let taints = BTreeMap::from([("node.kubernetes.io/unreachable".to_string(), "".to_string())]);
        assert_eq!(status_value(NodeMode::Ready, &taints, false), STATUS_NOT_READY);
    }

    #[test]
    fn envtest_sentinel_relaxes_not_ready_taint_only() {
        let taints = BTreeMap::from([(consts::NODE_NOT_READY_TAINT.to_string(), "".to_string())]);
        assert_eq!(status_value(NodeMode::Ready, &taints, true), STATUS_READY);

        let unreachable = BTreeMap::from([("node.kubernetes.io/unreachable".to_string(), "".to_string())]);
        assert_eq!(status_value(NodeMode::Ready, &unreachable, true), STATUS_NOT_READY);
    }

    #[test]
    fn clean_node_is_ready() {
        assert_eq!(status_value(NodeMode::Ready, &BTreeMap::new(), false), STATUS_READY);
    }
}
