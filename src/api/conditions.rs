//! Shared condition type and transition helper, used by both the Machine and
//! MachineNodePool status subresources.
//!
//! Grounded on the teacher corpus's `Condition` CRD status type (see the
//! `h2o-kubernetes` operator's `crd.rs`) and on the upstream Go controller's
//! `meta.SetStatusCondition` transition semantics
//! (`original_source/pkg/controllers/machine_controller.go`).

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const CONDITION_READY: &str = "Ready";
pub const REASON_SUCCESS: &str = "Success";
pub const REASON_FAILURE: &str = "ReconcileError";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A `metav1.Condition`-shaped status entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    pub reason: String,
    pub message: String,
    pub last_transition_time: DateTime<Utc>,
}

/// Sets (or replaces) the named condition, mimicking `meta.SetStatusCondition`:
/// the transition time only advances when the status actually flips.
pub fn set_condition(
    conditions: &mut Vec<Condition>,
    type_: &str,
    status: ConditionStatus,
    reason: &str,
    message: impl Into<String>,
    now: DateTime<Utc>,
) {
    let message = message.into();
    if let Some(existing) = conditions.iter_mut().find(|c| c.type_ == type_) {
        if existing.status != status {
            existing.last_transition_time = now;
        }
        existing.status = status;
        existing.reason = reason.to_string();
        existing.message = message;
        return;
    }
    conditions.push(Condition {
        type_: type_.to_string(),
        status,
        reason: reason.to_string(),
        message,
        last_transition_time: now,
    });
}

pub fn ready_condition(status: &[Condition]) -> Option<&Condition> {
    status.iter().find(|c| c.type_ == CONDITION_READY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transition_time_only_advances_on_status_change() {
        let mut conditions = vec![];
        let t0 = Utc::now();
        set_condition(&mut conditions, CONDITION_READY, ConditionStatus::True, REASON_SUCCESS, "ok", t0);
        let first_time = conditions[0].last_transition_time;

        let t1 = t0 + chrono::Duration::seconds(10);
        set_condition(&mut conditions, CONDITION_READY, ConditionStatus::True, REASON_SUCCESS, "still ok", t1);
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].last_transition_time, first_time);
        assert_eq!(conditions[0].message, "still ok");

        let t2 = t1 + chrono::Duration::seconds(10);
        set_condition(&mut conditions, CONDITION_READY, ConditionStatus::False, REASON_FAILURE, "broke", t2);
        assert_eq!(conditions[0].last_transition_time, t2);
    }
}
