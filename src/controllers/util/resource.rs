//! Builds the desired placeholder StatefulSet + Service for a machineType.
//!
//! Grounded on `original_source/pkg/controllers/utils/resource.go`'s
//! `GenerateStatefulSet` / `GenerateService`.

use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{StatefulSet, StatefulSetSpec};
use k8s_openapi::api::core::v1::{
    Affinity, Container, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PodSpec, PodTemplateSpec, ResourceRequirements, Service, ServiceSpec, Toleration,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference};
use kube::{Resource, ResourceExt};

use crate::api::machine::{Machine, MachineType};
use crate::consts::{self, machine_type_gating_key};

use super::name::reservation_resource_name;

fn selector_labels(machine_group: &str, machine_type: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (consts::MACHINE_GROUP_KEY.to_string(), machine_group.to_string()),
        (consts::MACHINE_TYPE_KEY.to_string(), machine_type.to_string()),
        (consts::POD_ROLE_KEY.to_string(), consts::POD_ROLE_RESERVATION.to_string()),
    ])
}

pub(crate) fn resource_list(mt: &MachineType) -> BTreeMap<String, Quantity> {
    let mut list = BTreeMap::new();
    list.insert("cpu".to_string(), mt.cpu.clone());
    list.insert("memory".to_string(), mt.memory.clone());
    if let Some(gpu) = &mt.gpu {
        list.insert(gpu.type_.clone(), gpu.count.clone());
    }
    list
}

/// The two gating tolerations/affinity-match-expressions shared by the
/// placeholder StatefulSet template and the Pod Resource Injector's rewrite,
/// per `original_source/pkg/api/v1alpha1/affinity.go`'s `GenerateToleration` /
/// `GenerateAffinityMatchExpression`.
pub(crate) fn toleration_pair(machine_group: &str, machine_type: &str) -> Vec<Toleration> {
    vec![
        Toleration {
            key: Some(machine_type_gating_key(machine_type)),
            operator: Some("Equal".to_string()),
            value: Some(machine_group.to_string()),
            effect: Some("NoSchedule".to_string()),
            toleration_seconds: None,
        },
        Toleration {
            key: Some(consts::MACHINE_STATUS_KEY.to_string()),
            operator: Some("Equal".to_string()),
            value: Some("ready".to_string()),
            effect: Some("NoSchedule".to_string()),
            toleration_seconds: None,
        },
    ]
}

pub(crate) fn match_expressions(machine_group: &str, mt: &MachineType) -> Vec<NodeSelectorRequirement> {
    let mut expressions = vec![
        NodeSelectorRequirement {
            key: machine_type_gating_key(&mt.name),
            operator: "In".to_string(),
            values: Some(vec![machine_group.to_string()]),
        },
        NodeSelectorRequirement {
            key: consts::MACHINE_STATUS_KEY.to_string(),
            operator: "In".to_string(),
            values: Some(vec!["ready".to_string()]),
        },
    ];
    if let Some(gpu) = &mt.gpu {
        if let Some((key, value)) = gpu.selector_key_value() {
            expressions.push(NodeSelectorRequirement {
                key: key.to_string(),
                operator: "In".to_string(),
                values: Some(vec![value.to_string()]),
            });
        }
    }
    expressions
}

fn tolerations(machine_group: &str, machine_type: &str) -> Vec<Toleration> {
    toleration_pair(machine_group, machine_type)
}

fn affinity(machine_group: &str, mt: &MachineType) -> Affinity {
    Affinity {
        node_affinity: Some(NodeAffinity {
            required_during_scheduling_ignored_during_execution: Some(NodeSelector {
                node_selector_terms: vec![NodeSelectorTerm { match_expressions: Some(match_expressions(machine_group, mt)), match_fields: None }],
            }),
            preferred_during_scheduling_ignored_during_execution: None,
        }),
        pod_affinity: None,
        pod_anti_affinity: None,
    }
}

pub(crate) fn owner_reference(machine: &Machine) -> OwnerReference {
    OwnerReference {
        api_version: Machine::api_version(&()).to_string(),
        kind: Machine::kind(&()).to_string(),
        name: machine.name_any(),
        uid: machine.uid().unwrap_or_default(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// Builds the desired StatefulSet for `machine_type`, sized to `replicas`.
pub fn desired_statefulset(machine: &Machine, machine_group: &str, machine_type: &MachineType, replicas: i32, core_namespace: &str) -> StatefulSet {
    let name = reservation_resource_name(machine_group, &machine_type.name);
    let labels = selector_labels(machine_group, &machine_type.name);
    let resources = resource_list(machine_type);

    StatefulSet {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            namespace: Some(core_namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(machine)]),
            ..Default::default()
        },
        spec: Some(StatefulSetSpec {
            replicas: Some(replicas),
            service_name: name,
            selector: LabelSelector { match_labels: Some(labels.clone()), match_expressions: None },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta { labels: Some(labels), ..Default::default() }),
                spec: Some(PodSpec {
                    termination_grace_period_seconds: Some(10),
                    tolerations: Some(tolerations(machine_group, &machine_type.name)),
                    affinity: Some(affinity(machine_group, machine_type)),
                    containers: vec![Container {
                        name: "reservation".to_string(),
                        image: Some(consts::PLACEHOLDER_IMAGE.to_string()),
                        command: Some(vec!["sh".to_string(), "-c".to_string()]),
                        args: Some(vec!["sleep infinity".to_string()]),
                        resources: Some(ResourceRequirements {
                            requests: Some(resources.clone()),
                            limits: Some(resources),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: None,
    }
}

/// Builds the companion headless-style Service for `machine_type`.
pub fn desired_service(machine: &Machine, machine_group: &str, machine_type_name: &str, core_namespace: &str) -> Service {
    let name = reservation_resource_name(machine_group, machine_type_name);
    let labels = selector_labels(machine_group, machine_type_name);

    Service {
        metadata: ObjectMeta {
            name: Some(name),
            namespace: Some(core_namespace.to_string()),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner_reference(machine)]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            cluster_ip: Some("None".to_string()),
            ..Default::default()
        }),
        status: None,
    }
}
