//! `MachineNodePool` custom resource: the derived, controller-owned pool
//! object that the Pool Reconciler converges Nodes against.
//!
//! Grounded on `original_source/api/v1alpha1/machinenodepool_types.go`.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::Condition;
use super::machine::NodePoolEntry;

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "imperator.tenzen-y.io",
    version = "v1alpha1",
    kind = "MachineNodePool",
    status = "MachineNodePoolStatus",
    shortname = "mnp",
    scope = "Cluster"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineNodePoolSpec {
    pub machine_group: String,
    pub node_pool: Vec<NodePoolEntry>,
    /// De-duplicated union of all machineType names referenced by the Machine.
    pub machine_type_stock: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum NodeCondition {
    Healthy,
    Maintenance,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolCondition {
    pub node_name: String,
    pub condition: NodeCondition,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineNodePoolStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub node_pool_condition: Vec<NodePoolCondition>,
}

/// Deterministic MachineNodePool name derived from the machine group.
/// Grounded on `original_source/pkg/controllers/utils/utils.go`'s
/// `GetMachineNodePoolName`.
pub fn derive_pool_name(machine_group: &str) -> String {
    format!("{machine_group}-node-pool")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_name_is_deterministic() {
        assert_eq!(derive_pool_name("gpu-fleet"), "gpu-fleet-node-pool");
    }
}
