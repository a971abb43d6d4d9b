//! Pod Resource Injector (spec.md §4.3).
//!
//! Grounded on
//! `original_source/pkg/api/v1alpha1/pod_resource_injector.go` (gating,
//! lookup, rewrite order) and `affinity.go` (match-expression/toleration
//! construction, shared with the placeholder StatefulSet builder in
//! `controllers/util/resource.rs`).

use k8s_openapi::api::core::v1::{Affinity, NodeAffinity, NodeSelector, NodeSelectorTerm, Pod, ResourceRequirements};
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};

use crate::api::machine::{Machine, MachineType};
use crate::consts;
use crate::controllers::util::resource::{match_expressions, resource_list, toleration_pair};
use crate::error::Error;

/// Gating check (`requiredInjection`): the pod's namespace must opt in, and
/// the pod must carry the three reservation labels.
pub async fn required_injection(pod: &Pod, client: &Client) -> Result<bool, Error> {
    let ns_name = match pod.metadata.namespace.as_deref() {
        Some(ns) => ns,
        None => return Ok(false),
    };
    let namespaces: Api<k8s_openapi::api::core::v1::Namespace> = Api::all(client.clone());
    let namespace = namespaces.get(ns_name).await?;
    if namespace.labels().get(consts::RESOURCE_INJECTION_KEY).map(String::as_str) != Some(consts::RESOURCE_INJECTION_ENABLED) {
        return Ok(false);
    }

    let labels = pod.labels();
    if !labels.contains_key(consts::MACHINE_GROUP_KEY) {
        return Ok(false);
    }
    if !labels.contains_key(consts::MACHINE_TYPE_KEY) {
        return Ok(false);
    }
    if labels.get(consts::POD_ROLE_KEY).map(String::as_str) != Some(consts::POD_ROLE_GUEST) {
        return Ok(false);
    }

    Ok(true)
}

/// Rewrites `pod` in place if it requires injection. Returns whether a
/// rewrite happened; returns `Ok(false)` untouched for a pass-through pod.
pub async fn inject(pod: &mut Pod, client: Client) -> Result<bool, Error> {
    if !required_injection(pod, &client).await? {
        return Ok(false);
    }

    let namespace = pod.metadata.namespace.clone().ok_or(Error::MissingField("pod namespace"))?;
    let name = pod.metadata.name.clone();
    if let Some(name) = &name {
        let pods: Api<Pod> = Api::namespaced(client.clone(), &namespace);
        if pods.get_opt(name).await?.is_some() {
            return Err(Error::Admission(format!("pod {namespace}/{name} already exists; resource injection of an existing pod is not permitted")));
        }
    }

    let group = pod.labels().get(consts::MACHINE_GROUP_KEY).cloned().ok_or(Error::MissingField("pod machine group label"))?;
    let machine_type_name = pod.labels().get(consts::MACHINE_TYPE_KEY).cloned().ok_or(Error::MissingField("pod machine type label"))?;

    let machines: Api<Machine> = Api::all(client);
    let lp = ListParams::default().labels(&format!("{}={group}", consts::MACHINE_GROUP_KEY));
    let list = machines.list(&lp).await?;
    let machine = list
        .items
        .first()
        .ok_or_else(|| Error::Admission(format!("failed to find machine-group <{group}>")))?;

    let mt = machine
        .spec
        .machine_type(&machine_type_name)
        .ok_or_else(|| Error::Admission(format!("machine-group <{group}> does not have machine-type <{machine_type_name}>")))?;

    let reserved = machine
        .status
        .as_ref()
        .and_then(|s| s.usage(&machine_type_name))
        .map(|usage| usage.reserved)
        .unwrap_or(0);
    if reserved == 0 {
        return Err(Error::Admission(format!("machine-type <{machine_type_name}> has no reserved capacity available")));
    }

    rewrite_resources(pod, mt)?;
    rewrite_affinity(pod, &group, mt);
    rewrite_tolerations(pod, &group, &machine_type_name);

    Ok(true)
}

fn target_container_index(pod: &Pod) -> usize {
    let Some(containers) = pod.spec.as_ref().map(|s| &s.containers) else { return 0 };
    let Some(wanted) = pod.labels().get(consts::RESOURCE_INJECT_CONTAINER_NAME_KEY) else { return 0 };
    containers.iter().position(|c| &c.name == wanted).unwrap_or(0)
}

fn rewrite_resources(pod: &mut Pod, mt: &MachineType) -> Result<(), Error> {
    let idx = target_container_index(pod);
    let resources = resource_list(mt);
    let spec = pod.spec.as_mut().ok_or(Error::MissingField("pod spec"))?;
    let container = spec.containers.get_mut(idx).ok_or(Error::MissingField("pod container"))?;
    container.resources = Some(ResourceRequirements { requests: Some(resources.clone()), limits: Some(resources), ..Default::default() });
    Ok(())
}

/// Removes any pre-existing match expression whose key collides with the
/// computed ones, then appends a fresh node-selector term — mirroring
/// `setPodAffinity` in `pod_resource_injector.go`.
fn rewrite_affinity(pod: &mut Pod, group: &str, mt: &MachineType) {
    let required = match_expressions(group, mt);
    let required_keys: Vec<&str> = required.iter().map(|e| e.key.as_str()).collect();

    let spec = pod.spec.get_or_insert_with(Default::default);
    let affinity = spec.affinity.get_or_insert_with(|| Affinity { node_affinity: None, pod_affinity: None, pod_anti_affinity: None });
    let node_affinity = affinity.node_affinity.get_or_insert_with(|| NodeAffinity {
        required_during_scheduling_ignored_during_execution: None,
        preferred_during_scheduling_ignored_during_execution: None,
    });
    let selector = node_affinity
        .required_during_scheduling_ignored_during_execution
        .get_or_insert_with(|| NodeSelector { node_selector_terms: vec![] });

    for term in &mut selector.node_selector_terms {
        if let Some(expressions) = term.match_expressions.as_mut() {
            expressions.retain(|e| !required_keys.contains(&e.key.as_str()));
        }
    }

    selector.node_selector_terms.push(NodeSelectorTerm { match_expressions: Some(required), match_fields: None });
}

/// Removes any existing toleration with the same key, then appends the
/// computed one — mirroring `setPodToleration`.
fn rewrite_tolerations(pod: &mut Pod, group: &str, machine_type: &str) {
    let computed = toleration_pair(group, machine_type);
    let computed_keys: Vec<Option<&str>> = computed.iter().map(|t| t.key.as_deref()).collect();

    let spec = pod.spec.get_or_insert_with(Default::default);
    let tolerations = spec.tolerations.get_or_insert_with(Vec::new);
    tolerations.retain(|t| !computed_keys.contains(&t.key.as_deref()));
    tolerations.extend(computed);
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{Container, NodeSelectorRequirement, PodSpec, Toleration};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn small() -> MachineType {
        MachineType {
            name: "small".into(),
            cpu: k8s_openapi::apimachinery::pkg::api::resource::Quantity("2".into()),
            memory: k8s_openapi::apimachinery::pkg::api::resource::Quantity("8Gi".into()),
            gpu: None,
            available: 3,
            dependence: None,
        }
    }

    fn pod_with_container(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta { name: Some("guest-1".into()), namespace: Some("default".into()), ..Default::default() },
            spec: Some(PodSpec { containers: vec![Container { name: name.into(), ..Default::default() }], ..Default::default() }),
            status: None,
        }
    }

    #[test]
    fn target_container_defaults_to_index_zero() {
        let pod = pod_with_container("app");
        assert_eq!(target_container_index(&pod), 0);
    }

    #[test]
    fn target_container_honors_label() {
        let mut pod = pod_with_container("app");
        pod.spec.as_mut().unwrap().containers.push(Container { name: "sidecar".into(), ..Default::default() });
        pod.metadata.labels = Some(BTreeMap::from([(consts::RESOURCE_INJECT_CONTAINER_NAME_KEY.to_string(), "sidecar".to_string())]));
        assert_eq!(target_container_index(&pod), 1);
    }

    #[test]
    fn rewrite_resources_sets_requests_equal_to_limits() {
        let mut pod = pod_with_container("app");
        rewrite_resources(&mut pod, &small()).unwrap();
        let resources = pod.spec.unwrap().containers[0].resources.clone().unwrap();
        assert_eq!(resources.requests, resources.limits);
    }

    #[test]
    fn rewrite_affinity_removes_colliding_key_before_appending() {
        let mut pod = pod_with_container("app");
        let stale_key = crate::consts::machine_type_gating_key("small");
        pod.spec.as_mut().unwrap().affinity = Some(Affinity {
            node_affinity: Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                    node_selector_terms: vec![NodeSelectorTerm { match_expressions: Some(vec![NodeSelectorRequirement { key: stale_key, operator: "In".into(), values: Some(vec!["stale-group".into()]) }]), match_fields: None }],
                }),
                preferred_during_scheduling_ignored_during_execution: None,
            }),
            pod_affinity: None,
            pod_anti_affinity: None,
        });

        rewrite_affinity(&mut pod, "fleet-a", &small());

        let terms = pod.spec.unwrap().affinity.unwrap().node_affinity.unwrap().required_during_scheduling_ignored_during_execution.unwrap().node_selector_terms;
        assert_eq!(terms.len(), 2);
        assert!(terms[0].match_expressions.as_ref().unwrap().is_empty());
        assert_eq!(terms[1].match_expressions.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn rewrite_tolerations_replaces_same_key() {
        let mut pod = pod_with_container("app");
        pod.spec.as_mut().unwrap().tolerations = Some(vec![Toleration { key: Some(consts::MACHINE_STATUS_KEY.to_string()), operator: Some("Equal".into()), value: Some("maintenance".into()), effect: Some("NoSchedule".into()), toleration_seconds: None }]);

        rewrite_tolerations(&mut pod, "fleet-a", "small");

        let tolerations = pod.spec.unwrap().tolerations.unwrap();
        assert_eq!(tolerations.len(), 2);
        let status = tolerations.iter().find(|t| t.key.as_deref() == Some(consts::MACHINE_STATUS_KEY)).unwrap();
        assert_eq!(status.value.as_deref(), Some("ready"));
    }
}
