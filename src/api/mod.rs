pub mod conditions;
pub mod machine;
pub mod machine_node_pool;

pub use machine::{Machine, MachineSpec, MachineStatus};
pub use machine_node_pool::{MachineNodePool, MachineNodePoolSpec, MachineNodePoolStatus};
