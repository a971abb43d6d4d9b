//! Node label helpers shared by the Pool Reconciler.
//!
//! Grounded on `original_source/pkg/controllers/utils/label.go`.

use std::collections::BTreeMap;

use crate::consts::{self, machine_type_gating_key};

/// The desired label set for a node pool entry: `status` plus the
/// `<group-prefix>/<machineType>` gating key, per spec.md §4.1 step 3.
pub fn desired_labels(status_value: &str, machine_type: &str, machine_group: &str) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(consts::MACHINE_STATUS_KEY.to_string(), status_value.to_string());
    labels.insert(machine_type_gating_key(machine_type), machine_group.to_string());
    labels
}

/// True if `existing` already carries every key/value pair in `desired`
/// (existing may carry unrelated labels too — only the managed keys matter).
pub fn contains_all(existing: &BTreeMap<String, String>, desired: &BTreeMap<String, String>) -> bool {
    desired.iter().all(|(k, v)| existing.get(k) == Some(v))
}

/// Strips the `status` label and any per-machineType label whose value equals
/// `machine_group`, for the given set of gating keys. Mirrors
/// `removeNodeLabel` in `original_source/pkg/controllers/machinenodepool_controller.go`.
pub fn strip(labels: &mut BTreeMap<String, String>, machine_type_keys: &[String], machine_group: &str) {
    labels.remove(consts::MACHINE_STATUS_KEY);
    for key in machine_type_keys {
        if labels.get(key).map(|v| v.as_str()) == Some(machine_group) {
            labels.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn desired_labels_carries_status_and_gating_key() {
        let labels = desired_labels("ready", "small", "group-a");
        assert_eq!(labels.get(consts::MACHINE_STATUS_KEY).unwrap(), "ready");
        assert_eq!(labels.get(&machine_type_gating_key("small")).unwrap(), "group-a");
    }

    #[test]
    fn strip_only_removes_matching_group() {
        let key = machine_type_gating_key("small");
        let mut labels = BTreeMap::from([
            (consts::MACHINE_STATUS_KEY.to_string(), "ready".to_string()),
            (key.clone(), "other-group".to_string()),
        ]);
        strip(&mut labels, &[key.clone()], "group-a");
        assert!(!labels.contains_key(consts::MACHINE_STATUS_KEY));
        // value belongs to a different group, so it must survive.
        assert_eq!(labels.get(&key).unwrap(), "other-group");
    }

    #[test]
    fn contains_all_ignores_unrelated_labels() {
        let mut existing = BTreeMap::new();
        existing.insert("unrelated".to_string(), "x".to_string());
        existing.insert(consts::MACHINE_STATUS_KEY.to_string(), "ready".to_string());
        let desired = desired_labels("ready", "small", "group-a");
        assert!(!contains_all(&existing, &desired));
        existing.insert(machine_type_gating_key("small"), "group-a".to_string());
        assert!(contains_all(&existing, &desired));
    }
}
