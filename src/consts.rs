//! Well-known label/annotation/taint keys and other constants shared across
//! the reconcilers and the admission injector.
//!
//! Grounded on `original_source/pkg/consts/const.go`.

use std::time::Duration;

/// Group used for the CRDs and for the `<group-prefix>/<machineType>` gating key.
pub const GROUP: &str = "imperator.tenzen-y.io";

/// Label carried on Machine, Node (as annotation) and Pod identifying a machine group.
pub const MACHINE_GROUP_KEY: &str = "imperator.tenzen-y.io/machine-group";

/// Label/taint carrying the node's pool status (`ready` / `not-ready` / `maintenance`).
pub const MACHINE_STATUS_KEY: &str = "imperator.tenzen-y.io/node-pool";

/// Label on Pod selecting a machineType within a machine group.
pub const MACHINE_TYPE_KEY: &str = "imperator.tenzen-y.io/machine-type";

/// Label on Pod identifying its role (`reservation` or `guest`).
pub const POD_ROLE_KEY: &str = "imperator.tenzen-y.io/pod-role";

pub const POD_ROLE_RESERVATION: &str = "reservation";
pub const POD_ROLE_GUEST: &str = "guest";

pub const KIND_MACHINE: &str = "Machine";
pub const KIND_MACHINE_NODE_POOL: &str = "MachineNodePool";

pub const MACHINE_NODE_POOL_FINALIZER: &str = "imperator.tenzen-y.io/machinenodepool-finalizer";

pub const NVIDIA_GPU_FAMILY_KEY: &str = "nvidia.com/gpu.family";
pub const NVIDIA_GPU_PRODUCT_KEY: &str = "nvidia.com/gpu.product";
pub const NVIDIA_GPU_MODEL_KEY: &str = "nvidia.com/gpu.model";

/// Namespace opt-in label read by the Pod Resource Injector.
pub const RESOURCE_INJECTION_KEY: &str = "imperator.tenzen-y.io/inject-resource";
pub const RESOURCE_INJECTION_ENABLED: &str = "enabled";

/// Pod label naming the container the injector should rewrite.
pub const RESOURCE_INJECT_CONTAINER_NAME_KEY: &str = "imperator.tenzen-y.io/injecting-container";

/// Image used for placeholder StatefulSet pods: they only need to hold the
/// node's resources hostage, not run anything.
pub const PLACEHOLDER_IMAGE: &str = "alpine:3.18";

/// Node taints which indicate a node cannot currently accept scheduled work.
/// Canonical four-entry set per spec.md; matches `original_source`'s
/// `CannotUseNodeTaints`.
pub const CANNOT_USE_NODE_TAINTS: [&str; 4] = [
    "node.kubernetes.io/not-ready",
    "node.kubernetes.io/unschedulable",
    "node.kubernetes.io/network-unavailable",
    "node.kubernetes.io/unreachable",
];

/// The one taint whose effect is relaxed under `ENVTEST=true`, since envtest
/// nodes never receive a kubelet heartbeat.
pub const NODE_NOT_READY_TAINT: &str = "node.kubernetes.io/not-ready";

/// Default requeue interval used by `error_policy` for transient errors.
pub const DEFAULT_REQUEUE: Duration = Duration::from_secs(30);

/// Builds the `<group-prefix>/<machineTypeName>` gating key used as a Node
/// label/taint key and as a Pod affinity/toleration key.
pub fn machine_type_gating_key(machine_type_name: &str) -> String {
    format!("{GROUP}/{machine_type_name}")
}
