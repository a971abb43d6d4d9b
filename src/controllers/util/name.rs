//! Deterministic name builders for controller-owned child objects.
//!
//! Grounded on `original_source/pkg/controllers/utils/resource.go`'s
//! `GetReservationResourceName` and `pkg/controllers/utils/utils.go`'s
//! `GetMachineNodePoolName`.

/// Name shared by a machineType's placeholder StatefulSet and Service.
pub fn reservation_resource_name(machine_group: &str, machine_type: &str) -> String {
    format!("{machine_group}.{machine_type}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn joins_group_and_type_with_a_dot() {
        assert_eq!(reservation_resource_name("fleet-a", "small"), "fleet-a.small");
    }
}
