//! Machine Reconciler (spec.md §4.2).
//!
//! Derives the `MachineNodePool`, converges the per-machineType placeholder
//! StatefulSet/Service pair, and recomputes the usage ledger from live pods.
//!
//! Grounded on `original_source/pkg/controllers/machine_controller.go` for the
//! pool-derivation shape and on `pkg/controllers/utils/status.go` for the usage
//! counting rules; the create-or-update primitive is grounded on the corpus's
//! server-side-apply idiom (see SPEC_FULL.md §4's grounding notes).

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::instrument;

use crate::api::conditions::{set_condition, ConditionStatus, CONDITION_READY, REASON_FAILURE, REASON_SUCCESS};
use crate::api::machine::{AvailableMachineCondition, Machine, MachineType, UsageCondition};
use crate::api::machine_node_pool::{derive_pool_name, MachineNodePool, MachineNodePoolSpec};
use crate::consts;
use crate::controllers::util::{name::reservation_resource_name, resource};
use crate::error::Error;
use crate::manager::Context;

const FIELD_MANAGER: &str = "imperator-machine-reconciler";

#[instrument(skip(ctx), fields(name = %machine.name_any()))]
pub async fn reconcile(machine: Arc<Machine>, ctx: Arc<Context>) -> Result<Action, Error> {
    match run(&machine, &ctx).await {
        Ok(()) => Ok(Action::requeue(ctx.config.sync_period)),
        Err(err) => {
            publish_failure(&machine, &ctx, &err).await.ok();
            Err(err)
        }
    }
}

async fn run(machine: &Machine, ctx: &Context) -> Result<(), Error> {
    let group = machine_group(machine)?;

    apply_pool(machine, &group, ctx).await?;
    converge_placeholders(machine, &group, ctx).await?;
    let available_machines = recompute_usage(machine, &group, ctx).await?;
    publish_status(machine, available_machines, ctx).await?;

    Ok(())
}

/// Reads the machine group identifier from the Machine's own labels, per
/// spec.md §3 ("machineGroup (from metadata labels)").
fn machine_group(machine: &Machine) -> Result<String, Error> {
    machine
        .labels()
        .get(consts::MACHINE_GROUP_KEY)
        .cloned()
        .ok_or(Error::MissingField("machine group label"))
}

/// Server-side apply helper. Relies on the API server's field-ownership
/// tracking for idempotent convergence rather than a manually computed
/// created/updated/unchanged diff, satisfying spec.md §9's "Apply semantics"
/// note that either apply strategy is acceptable.
async fn apply<K>(api: &Api<K>, name: &str, obj: &K) -> Result<K, Error>
where
    K: kube::Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + std::fmt::Debug,
{
    let pp = PatchParams::apply(FIELD_MANAGER).force();
    Ok(api.patch(name, &pp, &Patch::Apply(obj)).await?)
}

fn derive_pool_spec(machine: &Machine, group: &str) -> MachineNodePoolSpec {
    let mut stock: BTreeSet<String> = BTreeSet::new();
    for mt in &machine.spec.machine_types {
        stock.insert(mt.name.clone());
    }

    MachineNodePoolSpec {
        machine_group: group.to_string(),
        node_pool: machine.spec.node_pool.clone(),
        machine_type_stock: stock.into_iter().collect(),
    }
}

async fn apply_pool(machine: &Machine, group: &str, ctx: &Context) -> Result<(), Error> {
    let name = derive_pool_name(group);
    let pools: Api<MachineNodePool> = Api::all(ctx.client.clone());

    let mut pool = MachineNodePool::new(&name, derive_pool_spec(machine, group));
    pool.meta_mut().owner_references = Some(vec![resource::owner_reference(machine)]);

    apply(&pools, &name, &pool).await?;
    Ok(())
}

/// Converges the placeholder StatefulSet + Service for every machineType that
/// already has a usage entry. A machineType with no usage entry yet is
/// skipped — the first reconciliation only initializes the ledger, per
/// spec.md §4.2's "first pass is status-init only".
async fn converge_placeholders(machine: &Machine, group: &str, ctx: &Context) -> Result<(), Error> {
    let statefulsets: Api<k8s_openapi::api::apps::v1::StatefulSet> = Api::namespaced(ctx.client.clone(), &ctx.config.core_namespace);
    let services: Api<k8s_openapi::api::core::v1::Service> = Api::namespaced(ctx.client.clone(), &ctx.config.core_namespace);

    for mt in &machine.spec.machine_types {
        let usage = match machine.status.as_ref().and_then(|s| s.usage(&mt.name)) {
            Some(usage) => usage,
            None => continue,
        };

        let replicas = usage.target_replicas();
        let name = reservation_resource_name(group, &mt.name);

        let sts = resource::desired_statefulset(machine, group, mt, replicas, &ctx.config.core_namespace);
        apply(&statefulsets, &name, &sts).await?;

        let svc = resource::desired_service(machine, group, &mt.name, &ctx.config.core_namespace);
        apply(&services, &name, &svc).await?;
    }

    Ok(())
}

fn containers_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| conditions.iter().any(|c| c.type_ == "ContainersReady" && c.status == "True"))
        .unwrap_or(false)
}

fn pod_scheduled_unschedulable(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| conditions.iter().any(|c| c.type_ == "PodScheduled" && c.status == "False" && c.reason.as_deref() == Some("Unschedulable")))
        .unwrap_or(false)
}

fn is_terminating(pod: &Pod) -> bool {
    pod.metadata.deletion_timestamp.is_some()
}

fn is_running(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Running")
}

fn is_pending(pod: &Pod) -> bool {
    pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some("Pending")
}

fn is_bound(pod: &Pod) -> bool {
    pod.spec.as_ref().and_then(|s| s.node_name.as_ref()).is_some()
}

fn label_selector(group: &str, machine_type: &str, role: &str) -> String {
    format!(
        "{}={group},{}={machine_type},{}={role}",
        consts::MACHINE_GROUP_KEY,
        consts::MACHINE_TYPE_KEY,
        consts::POD_ROLE_KEY,
    )
}

async fn count_reserved(pods: &Api<Pod>, group: &str, machine_type: &str) -> Result<i32, Error> {
    let lp = ListParams::default().labels(&label_selector(group, machine_type, consts::POD_ROLE_RESERVATION));
    let list = pods.list(&lp).await?;
    let count = list
        .items
        .iter()
        .filter(|pod| !is_terminating(pod))
        .filter(|pod| (is_running(pod) && containers_ready(pod)) || (is_pending(pod) && is_bound(pod)))
        .count();
    Ok(count as i32)
}

/// Counts `used`/`waiting` guest pods for one machineType, honoring the
/// namespace opt-in label. Namespace lookups are cached across the pool's
/// guest pods since the same namespace recurs for every guest of one type.
async fn count_guest(pods: &Api<Pod>, namespaces: &Api<Namespace>, group: &str, machine_type: &str) -> Result<(i32, i32), Error> {
    let lp = ListParams::default().labels(&label_selector(group, machine_type, consts::POD_ROLE_GUEST));
    let list = pods.list(&lp).await?;

    let mut opted_in_cache: HashMap<String, bool> = HashMap::new();
    let mut used = 0;
    let mut waiting = 0;

    for pod in &list.items {
        if is_terminating(pod) {
            continue;
        }
        let ns = match pod.metadata.namespace.as_deref() {
            Some(ns) => ns,
            None => continue,
        };

        let opted_in = match opted_in_cache.get(ns) {
            Some(v) => *v,
            None => {
                let opted_in = match namespaces.get(ns).await {
                    Ok(namespace) => namespace.labels().get(consts::RESOURCE_INJECTION_KEY).map(String::as_str) == Some(consts::RESOURCE_INJECTION_ENABLED),
                    Err(kube::Error::Api(err)) if err.code == 404 => false,
                    Err(err) => return Err(err.into()),
                };
                opted_in_cache.insert(ns.to_string(), opted_in);
                opted_in
            }
        };
        if !opted_in {
            continue;
        }

        if is_running(pod) && containers_ready(pod) {
            used += 1;
        } else if is_pending(pod) && is_bound(pod) {
            used += 1;
        } else if is_pending(pod) && !is_bound(pod) && pod_scheduled_unschedulable(pod) {
            waiting += 1;
        }
    }

    Ok((used, waiting))
}

/// Recomputes `availableMachines` from scratch for every declared machineType,
/// per spec.md §5's "no cross-reconciliation caching is permitted".
async fn recompute_usage(machine: &Machine, group: &str, ctx: &Context) -> Result<Vec<AvailableMachineCondition>, Error> {
    let pods: Api<Pod> = Api::all(ctx.client.clone());
    let namespaces: Api<Namespace> = Api::all(ctx.client.clone());

    let mut available_machines = Vec::with_capacity(machine.spec.machine_types.len());
    for mt in &machine.spec.machine_types {
        let reserved = count_reserved(&pods, group, &mt.name).await?;
        let (used, waiting) = count_guest(&pods, &namespaces, group, &mt.name).await?;

        available_machines.push(AvailableMachineCondition {
            name: mt.name.clone(),
            usage: UsageCondition { maximum: mt.available, reserved, used, waiting },
        });
    }

    Ok(available_machines)
}

async fn publish_status(machine: &Machine, available_machines: Vec<AvailableMachineCondition>, ctx: &Context) -> Result<(), Error> {
    let mut status = machine.status.clone().unwrap_or_default();
    let unchanged = status.available_machines == available_machines;
    if unchanged {
        return Ok(());
    }

    status.available_machines = available_machines;
    set_condition(&mut status.conditions, CONDITION_READY, ConditionStatus::True, REASON_SUCCESS, "reconciled machine", Utc::now());

    let machines: Api<Machine> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({ "status": status });
    machines.patch_status(&machine.name_any(), &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

async fn publish_failure(machine: &Machine, ctx: &Context, err: &Error) -> Result<(), Error> {
    let mut status = machine.status.clone().unwrap_or_default();
    set_condition(&mut status.conditions, CONDITION_READY, ConditionStatus::False, REASON_FAILURE, err.to_string(), Utc::now());

    let machines: Api<Machine> = Api::all(ctx.client.clone());
    let patch = serde_json::json!({ "status": status });
    machines.patch_status(&machine.name_any(), &PatchParams::default(), &Patch::Merge(&patch)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::machine::{MachineSpec, NodeMode, NodePoolEntry};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn machine_with_group(group: &str) -> Machine {
        let mut m = Machine::new(
            "fleet-a",
            MachineSpec {
                node_pool: vec![NodePoolEntry { node_name: "node-a".into(), mode: NodeMode::Ready, taint: false, machine_type: "small".into() }],
                machine_types: vec![MachineType { name: "small".into(), cpu: Quantity("1".into()), memory: Quantity("1Gi".into()), gpu: None, available: 1, dependence: None }],
            },
        );
        m.meta_mut().labels = Some(BTreeMap::from([(consts::MACHINE_GROUP_KEY.to_string(), group.to_string())]));
        m
    }

    #[test]
    fn machine_group_reads_the_label() {
        let machine = machine_with_group("fleet-a-group");
        assert_eq!(machine_group(&machine).unwrap(), "fleet-a-group");
    }

    #[test]
    fn machine_group_is_required() {
        let machine = Machine::new(
            "fleet-a",
            MachineSpec { node_pool: vec![], machine_types: vec![] },
        );
        assert!(machine_group(&machine).is_err());
    }

    #[test]
    fn derive_pool_spec_dedups_machine_type_stock() {
        let mut machine = machine_with_group("fleet-a-group");
        machine.spec.machine_types.push(MachineType { name: "small".into(), cpu: Quantity("1".into()), memory: Quantity("1Gi".into()), gpu: None, available: 1, dependence: None });
        let spec = derive_pool_spec(&machine, "fleet-a-group");
        assert_eq!(spec.machine_type_stock, vec!["small".to_string()]);
    }
}
