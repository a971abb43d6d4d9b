//! Node taint helpers shared by the Pool Reconciler.
//!
//! Grounded on `original_source/pkg/controllers/utils/taint.go` and the
//! taint-construction block in
//! `original_source/pkg/controllers/machinenodepool_controller.go`.

use std::collections::BTreeMap;

use chrono::Utc;
use k8s_openapi::api::core::v1::Taint;

use crate::consts::{self, machine_type_gating_key};

/// Projects a taint list down to a `key -> value` map, the way
/// `ExtractKeyValueFromTaint` does in the Go source. Structural (sorted key
/// set) comparison elsewhere relies on this to avoid ordering thrash.
pub fn key_values(taints: &[Taint]) -> BTreeMap<String, String> {
    taints.iter().map(|t| (t.key.clone(), t.value.clone().unwrap_or_default())).collect()
}

/// Builds the desired `NoSchedule` taints for a node pool entry: `status`
/// plus the `<group-prefix>/<machineType>` gating key, per spec.md §4.1 step 4.
pub fn desired_taints(status_value: &str, machine_type: &str, machine_group: &str) -> Vec<Taint> {
    let now = k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(Utc::now());
    vec![
        Taint {
            key: consts::MACHINE_STATUS_KEY.to_string(),
            value: Some(status_value.to_string()),
            effect: "NoSchedule".to_string(),
            time_added: Some(now.clone()),
        },
        Taint {
            key: machine_type_gating_key(machine_type),
            value: Some(machine_group.to_string()),
            effect: "NoSchedule".to_string(),
            time_added: Some(now),
        },
    ]
}

/// Merges `desired` taints into `existing`, replacing any taint that shares a
/// key (refreshing `timeAdded`) and appending the rest.
pub fn merge(existing: &mut Vec<Taint>, desired: Vec<Taint>) {
    for taint in desired {
        if let Some(slot) = existing.iter_mut().find(|t| t.key == taint.key) {
            *slot = taint;
        } else {
            existing.push(taint);
        }
    }
}

/// Strips the `status` taint and any per-machineType taint whose value equals
/// `machine_group`. Mirrors `removeNodeTaint` in the Go controller.
pub fn strip(taints: &mut Vec<Taint>, machine_type_keys: &[String], machine_group: &str) {
    taints.retain(|t| {
        if t.key == consts::MACHINE_STATUS_KEY {
            return false;
        }
        if machine_type_keys.contains(&t.key) && t.value.as_deref() == Some(machine_group) {
            return false;
        }
        true
    });
}

/// Structural equality ignoring ordering and `timeAdded`, used to decide
/// whether a Node update is actually required (spec.md §4.1 step 6 /
/// "Node surface idempotence" in §8).
pub fn structurally_equal(a: &[Taint], b: &[Taint]) -> bool {
    key_values(a) == key_values(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_replaces_same_key_and_appends_new() {
        let mut existing = vec![Taint {
            key: consts::MACHINE_STATUS_KEY.to_string(),
            value: Some("maintenance".to_string()),
            effect: "NoSchedule".to_string(),
            time_added: None,
        }];
        let desired = desired_taints("ready", "small", "group-a");
        merge(&mut existing, desired);
        assert_eq!(existing.len(), 2);
        let status = existing.iter().find(|t| t.key == consts::MACHINE_STATUS_KEY).unwrap();
        assert_eq!(status.value.as_deref(), Some("ready"));
    }

    #[test]
    fn strip_leaves_other_groups_taints_untouched() {
        let key = machine_type_gating_key("small");
        let mut taints = vec![
            Taint { key: consts::MACHINE_STATUS_KEY.to_string(), value: Some("ready".into()), effect: "NoSchedule".into(), time_added: None },
            Taint { key: key.clone(), value: Some("other-group".into()), effect: "NoSchedule".into(), time_added: None },
        ];
        strip(&mut taints, &[key.clone()], "group-a");
        assert_eq!(taints.len(), 1);
        assert_eq!(taints[0].key, key);
    }

    #[test]
    fn structural_equality_ignores_order_and_time_added() {
        let a = desired_taints("ready", "small", "group-a");
        let mut b = a.clone();
        b.reverse();
        for t in b.iter_mut() {
            t.time_added = None;
        }
        assert!(structurally_equal(&a, &b));
    }
}
