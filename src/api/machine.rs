//! `Machine` custom resource: the user-authored reservation spec and the
//! controller-owned usage ledger.
//!
//! Grounded on `original_source/api/v1alpha1/machine_types.go` and
//! `pkg/api/v1alpha1/machine_types.go` (dependence/GPU fields from the later
//! revision kept in `original_source`).

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::conditions::Condition;

/// One node assigned to a machine group's pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NodePoolEntry {
    pub node_name: String,
    #[serde(default)]
    pub mode: NodeMode,
    /// When true, the machine-type and status assignment are expressed as
    /// Node taints (repellent) instead of Node labels (permissive).
    pub taint: bool,
    pub machine_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum NodeMode {
    #[default]
    Ready,
    Maintenance,
}

/// Identifies which of `family`/`product`/`model` selects the GPU variant.
/// Exactly one must be present, per spec.md §3's GPU invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GpuSpec {
    #[serde(rename = "type")]
    pub type_: String,
    pub count: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl GpuSpec {
    /// The node-label/taint key and value pair used to gate scheduling onto
    /// this GPU variant, e.g. `(nvidia.com/gpu.family, ampere)`.
    pub fn selector_key_value(&self) -> Option<(&'static str, &str)> {
        if let Some(family) = self.family.as_deref() {
            return Some((crate::consts::NVIDIA_GPU_FAMILY_KEY, family));
        }
        if let Some(product) = self.product.as_deref() {
            return Some((crate::consts::NVIDIA_GPU_PRODUCT_KEY, product));
        }
        if let Some(model) = self.model.as_deref() {
            return Some((crate::consts::NVIDIA_GPU_MODEL_KEY, model));
        }
        None
    }

    /// How many of `family`/`product`/`model` are set; must be exactly 1.
    pub(crate) fn variant_count(&self) -> usize {
        [self.family.is_some(), self.product.is_some(), self.model.is_some()]
            .into_iter()
            .filter(|b| *b)
            .count()
    }
}

/// A parent/child relationship expressing that this machineType's resources
/// are a fixed fraction of another machineType's.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Dependence {
    pub parent: String,
    pub available_ratio: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineType {
    pub name: String,
    pub cpu: Quantity,
    pub memory: Quantity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpu: Option<GpuSpec>,
    pub available: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependence: Option<Dependence>,
}

#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "imperator.tenzen-y.io",
    version = "v1alpha1",
    kind = "Machine",
    status = "MachineStatus",
    shortname = "mc",
    scope = "Cluster"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    pub node_pool: Vec<NodePoolEntry>,
    pub machine_types: Vec<MachineType>,
}

impl MachineSpec {
    pub fn machine_type(&self, name: &str) -> Option<&MachineType> {
        self.machine_types.iter().find(|mt| mt.name == name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsageCondition {
    pub maximum: i32,
    pub reserved: i32,
    pub used: i32,
    pub waiting: i32,
}

impl UsageCondition {
    /// Slack per spec.md §8's conservation invariant:
    /// `maximum = reserved + used + waiting + slack`, `slack >= 0`.
    pub fn slack(&self) -> i32 {
        self.maximum - self.reserved - self.used - self.waiting
    }

    /// `targetReplicas` per spec.md §4.2: the three-term placeholder-replica
    /// equation, codified over the historically ambiguous two-term variant.
    pub fn target_replicas(&self) -> i32 {
        let r = self.reserved - self.used - self.waiting;
        if r < 0 {
            return 0;
        }
        if r == 0 && self.reserved == 0 {
            return self.maximum;
        }
        r
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AvailableMachineCondition {
    pub name: String,
    pub usage: UsageCondition,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub available_machines: Vec<AvailableMachineCondition>,
}

impl MachineStatus {
    pub fn usage(&self, machine_type: &str) -> Option<&UsageCondition> {
        self.available_machines
            .iter()
            .find(|c| c.name == machine_type)
            .map(|c| &c.usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn usage(maximum: i32, reserved: i32, used: i32, waiting: i32) -> UsageCondition {
        UsageCondition { maximum, reserved, used, waiting }
    }

    #[test]
    fn target_replicas_is_three_term_difference() {
        assert_eq!(usage(3, 3, 0, 0).target_replicas(), 3);
        assert_eq!(usage(3, 2, 1, 0).target_replicas(), 2);
        assert_eq!(usage(3, 1, 1, 1).target_replicas(), 1);
    }

    #[test]
    fn target_replicas_floors_at_zero_when_overcommitted() {
        assert_eq!(usage(3, 1, 2, 2).target_replicas(), 0);
    }

    #[test]
    fn target_replicas_warms_up_from_all_zero() {
        assert_eq!(usage(5, 0, 0, 0).target_replicas(), 5);
    }

    #[test]
    fn slack_is_conservation_gap() {
        assert_eq!(usage(3, 1, 1, 1).slack(), 0);
        assert_eq!(usage(3, 1, 1, 0).slack(), 1);
    }

    #[test]
    fn gpu_variant_count_detects_exactly_one() {
        let gpu = GpuSpec {
            type_: "nvidia.com/gpu".into(),
            count: Quantity("1".into()),
            family: Some("ampere".into()),
            product: None,
            model: None,
        };
        assert_eq!(gpu.variant_count(), 1);
        assert_eq!(gpu.selector_key_value(), Some((crate::consts::NVIDIA_GPU_FAMILY_KEY, "ampere")));
    }
}
