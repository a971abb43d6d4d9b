//! Machine validating webhook (spec.md §4's validators, §6's "validating
//! path (machine)").
//!
//! Grounded on `original_source/pkg/api/v1alpha1/machine_webhook.go`'s
//! `ValidateLabel`/`ValidateNodeName`/`ValidateGPUSpec`/`ValidateDependence`.

use std::collections::{HashMap, HashSet};

use k8s_openapi::api::core::v1::Node;
use kube::api::{Api, ListParams};
use kube::ResourceExt;

use crate::api::machine::{Dependence, GpuSpec, Machine, MachineType};
use crate::consts;
use crate::controllers::util::quantity;
use crate::error::Error;

/// Runs every invariant check in spec.md §3, short-circuiting on the first
/// failure — mirroring `ValidateAllOperation`'s sequential checks.
pub async fn validate(machine: &Machine, client: kube::Client) -> Result<(), Error> {
    validate_label(machine)?;
    validate_uniqueness(machine, client.clone()).await?;
    validate_node_name(machine, client).await?;
    validate_gpu_specs(machine)?;
    validate_dependence(machine)?;
    Ok(())
}

/// At most one Machine may carry a given `machineGroup` label (spec.md §3,
/// called out again at the Pool/Machine Reconciler boundary and in §8's
/// invariants) — a second Machine with the same group is rejected.
async fn validate_uniqueness(machine: &Machine, client: kube::Client) -> Result<(), Error> {
    let group = match machine.labels().get(consts::MACHINE_GROUP_KEY) {
        Some(group) => group,
        None => return Ok(()),
    };

    let machines: Api<Machine> = Api::all(client);
    let lp = ListParams::default().labels(&format!("{}={group}", consts::MACHINE_GROUP_KEY));
    let list = machines.list(&lp).await?;

    let name = machine.name_any();
    if list.items.iter().any(|existing| existing.name_any() != name) {
        return Err(Error::Validation(format!("machine group {group} is already in use by another Machine")));
    }
    Ok(())
}

fn validate_label(machine: &Machine) -> Result<(), Error> {
    if !machine.labels().contains_key(consts::MACHINE_GROUP_KEY) {
        return Err(Error::Validation(format!("{} must be set in .metadata.labels", consts::MACHINE_GROUP_KEY)));
    }
    Ok(())
}

async fn validate_node_name(machine: &Machine, client: kube::Client) -> Result<(), Error> {
    let nodes: Api<Node> = Api::all(client);
    let existing: HashSet<String> = nodes.list(&ListParams::default()).await?.items.into_iter().map(|n| n.name_any()).collect();

    let mut pool_machine_types = HashSet::new();
    for entry in &machine.spec.node_pool {
        if !existing.contains(&entry.node_name) {
            return Err(Error::Validation(format!("failed to find node {} in the cluster", entry.node_name)));
        }
        pool_machine_types.insert(entry.machine_type.as_str());
    }

    check_unique_machine_type_names(&machine.spec.machine_types)?;
    for mt in &machine.spec.machine_types {
        if !pool_machine_types.contains(mt.name.as_str()) {
            return Err(Error::Validation(format!("failed to find machineType name {} in nodePool", mt.name)));
        }
    }

    Ok(())
}

/// Every `machineTypes[i].name` must be unique within the Machine (spec.md §3).
fn check_unique_machine_type_names(machine_types: &[MachineType]) -> Result<(), Error> {
    let mut seen = HashSet::new();
    for mt in machine_types {
        if !seen.insert(mt.name.as_str()) {
            return Err(Error::Validation(format!("duplicate machineTypes name {}", mt.name)));
        }
    }
    Ok(())
}

fn validate_gpu_specs(machine: &Machine) -> Result<(), Error> {
    for mt in &machine.spec.machine_types {
        let Some(gpu) = &mt.gpu else { continue };
        validate_gpu_spec(gpu)?;
    }
    Ok(())
}

fn validate_gpu_spec(gpu: &GpuSpec) -> Result<(), Error> {
    if gpu.type_.is_empty() {
        return Err(Error::Validation("gpu.type must be set".to_string()));
    }
    let count = quantity::as_f64(&gpu.count).map_err(Error::Validation)?;
    if count < 0.0 {
        return Err(Error::Validation(format!("gpu.count must be >= 0, got {count}")));
    }
    if gpu.variant_count() != 1 {
        return Err(Error::Validation("gpu spec must set exactly one of family/product/model".to_string()));
    }
    Ok(())
}

fn validate_dependence(machine: &Machine) -> Result<(), Error> {
    let by_name: HashMap<&str, &MachineType> = machine.spec.machine_types.iter().map(|mt| (mt.name.as_str(), mt)).collect();

    for mt in &machine.spec.machine_types {
        let Some(dependence) = &mt.dependence else { continue };
        validate_one_dependence(mt, dependence, &by_name)?;
    }
    Ok(())
}

fn validate_one_dependence(child: &MachineType, dependence: &Dependence, by_name: &HashMap<&str, &MachineType>) -> Result<(), Error> {
    if dependence.parent.is_empty() {
        return Err(Error::Validation("dependence.parent must be set".to_string()));
    }
    if !(dependence.available_ratio > 0.0 && dependence.available_ratio <= 1.0) {
        return Err(Error::Validation(format!(
            "name: <{}>, value: <{}>; dependence.availableRatio must satisfy 0 < ratio <= 1",
            child.name, dependence.available_ratio
        )));
    }

    let parent = by_name
        .get(dependence.parent.as_str())
        .ok_or_else(|| Error::Validation(format!("failed to find machine type {} in spec.machineTypes", dependence.parent)))?;

    let ratio = dependence.available_ratio;
    if !quantity::ratio_matches(&parent.cpu, &child.cpu, ratio).map_err(Error::Validation)? {
        return Err(Error::Validation(format!(
            "the ratio of cpus in child <{}> to parent <{}> does not equal {ratio}",
            child.name, dependence.parent
        )));
    }

    if !quantity::ratio_matches(&parent.memory, &child.memory, ratio).map_err(Error::Validation)? {
        return Err(Error::Validation(format!(
            "the ratio of memory in child <{}> to parent <{}> does not equal {ratio}",
            child.name, dependence.parent
        )));
    }

    if child.gpu.is_some() != parent.gpu.is_some() {
        return Err(Error::Validation(format!("machine name: <{}>; child must set GPU the same as parent", child.name)));
    }

    if let (Some(child_gpu), Some(parent_gpu)) = (&child.gpu, &parent.gpu) {
        if !quantity::ratio_matches(&parent_gpu.count, &child_gpu.count, ratio).map_err(Error::Validation)? {
            return Err(Error::Validation(format!("the ratio of gpu count in child <{}> to parent <{}> is wrong", child.name, dependence.parent)));
        }
        if parent_gpu.type_ != child_gpu.type_ {
            return Err(Error::Validation(format!("gpu.type must match for parent <{}> and child <{}>", dependence.parent, child.name)));
        }
        if parent_gpu.selector_key_value() != child_gpu.selector_key_value() {
            return Err(Error::Validation(format!("gpu family/product/model must match for parent <{}> and child <{}>", dependence.parent, child.name)));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::machine::{MachineSpec, NodeMode, NodePoolEntry};
    use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
    use std::collections::BTreeMap;

    fn machine(machine_types: Vec<MachineType>) -> Machine {
        let mut m = Machine::new(
            "fleet-a",
            MachineSpec {
                node_pool: machine_types.iter().map(|mt| NodePoolEntry { node_name: "node-a".into(), mode: NodeMode::Ready, taint: false, machine_type: mt.name.clone() }).collect(),
                machine_types,
            },
        );
        m.meta_mut().labels = Some(BTreeMap::from([(consts::MACHINE_GROUP_KEY.to_string(), "fleet-a-group".to_string())]));
        m
    }

    fn mt(name: &str, cpu: &str, memory: &str, dependence: Option<Dependence>) -> MachineType {
        MachineType { name: name.into(), cpu: Quantity(cpu.into()), memory: Quantity(memory.into()), gpu: None, available: 1, dependence }
    }

    #[test]
    fn missing_group_label_is_rejected() {
        let m = Machine::new("fleet-a", MachineSpec { node_pool: vec![], machine_types: vec![] });
        assert!(validate_label(&m).is_err());
    }

    #[test]
    fn dependence_requires_exact_ratio_match() {
        let parent = mt("large", "4", "16Gi", None);
        let child = mt("small", "2", "8Gi", Some(Dependence { parent: "large".into(), available_ratio: 0.5 }));
        let m = machine(vec![parent, child]);
        validate_dependence(&m).expect("half of 4 cpu / 16Gi should match the 0.5 ratio");
    }

    #[test]
    fn dependence_rejects_mismatched_ratio() {
        let parent = mt("large", "4", "16Gi", None);
        let child = mt("small", "3", "8Gi", Some(Dependence { parent: "large".into(), available_ratio: 0.5 }));
        let m = machine(vec![parent, child]);
        assert!(validate_dependence(&m).is_err());
    }

    #[test]
    fn dependence_rejects_ratio_above_one() {
        let parent = mt("large", "4", "16Gi", None);
        let child = mt("small", "8", "32Gi", Some(Dependence { parent: "large".into(), available_ratio: 2.0 }));
        let m = machine(vec![parent, child]);
        assert!(validate_dependence(&m).is_err());
    }

    #[test]
    fn gpu_spec_requires_exactly_one_variant() {
        let gpu = GpuSpec { type_: "nvidia.com/gpu".into(), count: Quantity("1".into()), family: Some("ampere".into()), product: Some("a100".into()), model: None };
        assert!(validate_gpu_spec(&gpu).is_err());
    }

    #[test]
    fn gpu_spec_rejects_negative_count() {
        let gpu = GpuSpec { type_: "nvidia.com/gpu".into(), count: Quantity("-1".into()), family: Some("ampere".into()), product: None, model: None };
        assert!(validate_gpu_spec(&gpu).is_err());
    }

    #[test]
    fn rejects_duplicate_machine_type_names() {
        let small = mt("small", "1", "1Gi", None);
        let duplicate = mt("small", "2", "2Gi", None);
        assert!(check_unique_machine_type_names(&[small, duplicate]).is_err());
    }

    #[test]
    fn accepts_distinct_machine_type_names() {
        let small = mt("small", "1", "1Gi", None);
        let large = mt("large", "2", "2Gi", None);
        assert!(check_unique_machine_type_names(&[small, large]).is_ok());
    }
}
