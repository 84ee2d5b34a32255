use std::collections::BTreeMap;

use k8s_openapi::{
    api::{
        apps::v1::{Deployment, DeploymentSpec},
        autoscaling::v2::{
            CrossVersionObjectReference, HorizontalPodAutoscaler, HorizontalPodAutoscalerSpec,
        },
        core::v1::{PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec},
        networking::v1::{
            HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule,
            IngressServiceBackend, IngressSpec, ServiceBackendPort,
        },
    },
    apimachinery::pkg::{
        apis::meta::v1::{LabelSelector, ObjectMeta, OwnerReference},
        util::intstr::IntOrString,
    },
};
use sha2::{Digest, Sha256};

use crate::consts::{COMPONENT_LABEL, INFERENCE_SERVICE_LABEL, ROLLOUT_HASH_ANNOTATION};
use crate::crd::{ComponentKind, ComponentSpec, Condition, PodFields};

/// The two labels every child of an InferenceService carries.
pub fn child_labels(isvc_name: &str, component: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (INFERENCE_SERVICE_LABEL.into(), isvc_name.into()),
        (COMPONENT_LABEL.into(), component.into()),
    ])
}

pub fn workload_name(isvc_name: &str, kind: ComponentKind) -> String {
    format!("{isvc_name}-{}", kind.suffix())
}

/// Hash of the merged pod fragment, stamped into the pod template so spec
/// changes roll the deployment.
pub fn rollout_fingerprint(pod: &PodFields) -> String {
    let mut h = Sha256::new();
    let bytes = serde_json::to_vec(pod).expect("fingerprint serialize");
    h.update(bytes);
    format!("{:x}", h.finalize())
}

pub fn pod_fields_to_pod_spec(fields: &PodFields) -> PodSpec {
    PodSpec {
        containers: fields.containers.clone(),
        volumes: fields.volumes.clone(),
        service_account_name: fields.service_account_name.clone(),
        node_selector: fields.node_selector.clone(),
        tolerations: fields.tolerations.clone(),
        affinity: fields.affinity.clone(),
        ..Default::default()
    }
}

/// Whether replica management belongs to an autoscaler rather than the
/// deployment's own replica count.
pub fn autoscaling_enabled(spec: &ComponentSpec) -> bool {
    spec.max_replicas.unwrap_or(0) > spec.min_replicas.unwrap_or(1)
}

/// A single-node component workload: `<isvc>-<component>`. The replica count
/// is left to the HPA when one is in play.
pub fn component_deployment(
    isvc_name: &str,
    kind: ComponentKind,
    spec: &ComponentSpec,
    owner: OwnerReference,
) -> Deployment {
    let labels = child_labels(isvc_name, kind.label());
    let fp = rollout_fingerprint(&spec.pod);

    Deployment {
        metadata: ObjectMeta {
            name: Some(workload_name(isvc_name, kind)),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: (!autoscaling_enabled(spec)).then(|| spec.min_replicas.unwrap_or(1)),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: Some(BTreeMap::from([(
                        ROLLOUT_HASH_ANNOTATION.to_string(),
                        fp,
                    )])),
                    ..Default::default()
                }),
                spec: Some(pod_fields_to_pod_spec(&spec.pod)),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// ClusterIP service in front of one component, `http:80 -> 8080`.
pub fn component_service(isvc_name: &str, kind: ComponentKind, owner: OwnerReference) -> Service {
    let labels = child_labels(isvc_name, kind.label());
    Service {
        metadata: ObjectMeta {
            name: Some(workload_name(isvc_name, kind)),
            labels: Some(labels.clone()),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(labels),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: 80,
                target_port: Some(IntOrString::Int(8080)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            type_: Some("ClusterIP".into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// HPA over a component deployment, `minReplicas..maxReplicas`.
pub fn component_hpa(
    isvc_name: &str,
    kind: ComponentKind,
    spec: &ComponentSpec,
    owner: OwnerReference,
) -> HorizontalPodAutoscaler {
    HorizontalPodAutoscaler {
        metadata: ObjectMeta {
            name: Some(workload_name(isvc_name, kind)),
            labels: Some(child_labels(isvc_name, kind.label())),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(HorizontalPodAutoscalerSpec {
            scale_target_ref: CrossVersionObjectReference {
                api_version: Some("apps/v1".into()),
                kind: "Deployment".into(),
                name: workload_name(isvc_name, kind),
            },
            min_replicas: Some(spec.min_replicas.unwrap_or(1)),
            max_replicas: spec.max_replicas.unwrap_or(1),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Ingress fronting the ingress-target component's service.
pub fn component_ingress(
    isvc_name: &str,
    namespace: &str,
    target: ComponentKind,
    owner: OwnerReference,
) -> Ingress {
    let backend = IngressBackend {
        service: Some(IngressServiceBackend {
            name: workload_name(isvc_name, target),
            port: Some(ServiceBackendPort {
                number: Some(80),
                name: None,
            }),
        }),
        resource: None,
    };

    let path = HTTPIngressPath {
        backend,
        path: Some("/".into()),
        path_type: "Prefix".into(),
    };

    let rule = IngressRule {
        host: Some(format!("{isvc_name}.{namespace}")),
        http: Some(HTTPIngressRuleValue { paths: vec![path] }),
    };

    Ingress {
        metadata: ObjectMeta {
            name: Some(isvc_name.to_string()),
            labels: Some(child_labels(isvc_name, target.label())),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(IngressSpec {
            ingress_class_name: None,
            rules: Some(vec![rule]),
            tls: None,
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Insert or replace a condition by type. The transition timestamp is carried
/// over when the status value did not change.
pub fn upsert_condition(list: &mut Vec<Condition>, mut newc: Condition) {
    if let Some(i) = list.iter().position(|c| c.type_ == newc.type_) {
        if list[i].status == newc.status && newc.last_transition_time.is_some() {
            newc.last_transition_time = list[i].last_transition_time.clone();
        }
        list[i] = newc;
    } else {
        list.push(newc);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::Container;

    fn engine_spec(image: &str) -> ComponentSpec {
        ComponentSpec {
            pod: PodFields {
                containers: vec![Container {
                    name: "engine".into(),
                    image: Some(image.into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
            ..Default::default()
        }
    }

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: crate::consts::api_version(),
            kind: "InferenceService".into(),
            name: "m1".into(),
            uid: "uid-1".into(),
            controller: Some(true),
            ..Default::default()
        }
    }

    #[test]
    fn component_deployment_carries_labels_and_owner() {
        let d = component_deployment(
            "m1",
            ComponentKind::Engine,
            &engine_spec("engine:latest"),
            owner(),
        );
        assert_eq!(d.metadata.name.as_deref(), Some("m1-engine"));
        let labels = d.metadata.labels.unwrap();
        assert_eq!(
            labels.get(INFERENCE_SERVICE_LABEL).map(String::as_str),
            Some("m1")
        );
        assert_eq!(labels.get(COMPONENT_LABEL).map(String::as_str), Some("engine"));
        let owners = d.metadata.owner_references.unwrap();
        assert_eq!(owners[0].kind, "InferenceService");
        assert_eq!(owners[0].uid, "uid-1");
        let image = d.spec.unwrap().template.spec.unwrap().containers[0]
            .image
            .clone();
        assert_eq!(image.as_deref(), Some("engine:latest"));
    }

    #[test]
    fn fingerprint_is_stable_and_spec_sensitive() {
        let a = engine_spec("engine:latest");
        let b = engine_spec("engine:latest");
        let c = engine_spec("engine:v2");
        assert_eq!(rollout_fingerprint(&a.pod), rollout_fingerprint(&b.pod));
        assert_ne!(rollout_fingerprint(&a.pod), rollout_fingerprint(&c.pod));
    }

    #[test]
    fn autoscaled_components_leave_replicas_to_the_hpa() {
        let mut spec = engine_spec("engine:latest");
        spec.min_replicas = Some(2);
        spec.max_replicas = Some(8);
        assert!(autoscaling_enabled(&spec));

        let d = component_deployment("m1", ComponentKind::Engine, &spec, owner());
        assert_eq!(d.spec.unwrap().replicas, None);

        let hpa = component_hpa("m1", ComponentKind::Engine, &spec, owner());
        let hpa_spec = hpa.spec.unwrap();
        assert_eq!(hpa_spec.min_replicas, Some(2));
        assert_eq!(hpa_spec.max_replicas, 8);
        assert_eq!(hpa_spec.scale_target_ref.name, "m1-engine");

        spec.max_replicas = None;
        assert!(!autoscaling_enabled(&spec));
        let d = component_deployment("m1", ComponentKind::Engine, &spec, owner());
        assert_eq!(d.spec.unwrap().replicas, Some(2));
    }

    #[test]
    fn component_service_targets_8080() {
        let s = component_service("m1", ComponentKind::Router, owner());
        assert_eq!(s.metadata.name.as_deref(), Some("m1-router"));
        let port = &s.spec.unwrap().ports.unwrap()[0];
        assert_eq!(port.port, 80);
        assert_eq!(port.target_port, Some(IntOrString::Int(8080)));
    }

    #[test]
    fn upsert_preserves_transition_time_when_status_unchanged() {
        let mut conds = vec![Condition {
            type_: "Ready".into(),
            status: "True".into(),
            last_transition_time: Some("2026-01-01T00:00:00Z".into()),
            ..Default::default()
        }];
        upsert_condition(
            &mut conds,
            Condition {
                type_: "Ready".into(),
                status: "True".into(),
                reason: Some("AllReady".into()),
                last_transition_time: Some("2026-02-02T00:00:00Z".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            conds[0].last_transition_time.as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
        assert_eq!(conds[0].reason.as_deref(), Some("AllReady"));

        upsert_condition(
            &mut conds,
            Condition {
                type_: "Ready".into(),
                status: "False".into(),
                last_transition_time: Some("2026-03-03T00:00:00Z".into()),
                ..Default::default()
            },
        );
        assert_eq!(
            conds[0].last_transition_time.as_deref(),
            Some("2026-03-03T00:00:00Z")
        );
    }
}
