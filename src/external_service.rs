//! Stable internal endpoint for an InferenceService when ingress creation is
//! disabled: a Service named exactly like the object, selecting the router,
//! else the engine, else the legacy predictor.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, info};

use crate::consts::{
    EXTERNAL_SERVICE_COMPONENT, MANAGER, PROPAGATED_SERVICE_ANNOTATION_PREFIXES,
    SERVICE_TYPE_ANNOTATION,
};
use crate::crd::{ComponentKind, InferenceService};
use crate::error::Result;
use crate::resources::child_labels;

/// Whether the external service should exist at all.
pub fn should_exist(isvc: &InferenceService) -> bool {
    isvc.ingress_disabled() && !isvc.is_cluster_local() && isvc.has_traffic_component()
}

/// Router wins, then engine, then the legacy predictor.
pub fn target_component(isvc: &InferenceService) -> Option<ComponentKind> {
    if isvc.spec.router.is_some() {
        Some(ComponentKind::Router)
    } else if isvc.spec.engine.is_some() {
        Some(ComponentKind::Engine)
    } else if isvc.spec.predictor.is_some() {
        Some(ComponentKind::Predictor)
    } else {
        None
    }
}

fn service_type(isvc: &InferenceService) -> String {
    match isvc.annotation(SERVICE_TYPE_ANNOTATION) {
        Some(t @ ("LoadBalancer" | "NodePort" | "ClusterIP")) => t.to_string(),
        _ => "ClusterIP".to_string(),
    }
}

/// Annotations copied from the InferenceService onto the Service, by prefix.
pub fn propagated_annotations(isvc: &InferenceService) -> BTreeMap<String, String> {
    isvc.annotations()
        .iter()
        .filter(|(k, _)| {
            PROPAGATED_SERVICE_ANNOTATION_PREFIXES
                .iter()
                .any(|p| k.starts_with(p))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub fn desired_external_service(
    isvc: &InferenceService,
    target: ComponentKind,
    owner: OwnerReference,
) -> Service {
    let name = isvc.name_any();
    let annotations = propagated_annotations(isvc);
    Service {
        metadata: ObjectMeta {
            name: Some(name.clone()),
            labels: Some(child_labels(&name, EXTERNAL_SERVICE_COMPONENT)),
            annotations: (!annotations.is_empty()).then_some(annotations),
            owner_references: Some(vec![owner]),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            selector: Some(child_labels(&name, target.label())),
            ports: Some(vec![ServicePort {
                name: Some("http".into()),
                port: 80,
                target_port: Some(IntOrString::Int(8080)),
                protocol: Some("TCP".into()),
                ..Default::default()
            }]),
            type_: Some(service_type(isvc)),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Drift worth an update: selector, ports, or type changed.
pub fn spec_drifted(current: &Service, desired: &Service) -> bool {
    let (Some(cur), Some(des)) = (current.spec.as_ref(), desired.spec.as_ref()) else {
        return true;
    };
    cur.selector != des.selector || cur.ports != des.ports || cur.type_ != des.type_
}

/// Converge the external service and report the in-cluster URL while it
/// exists.
pub async fn reconcile(client: &Client, isvc: &InferenceService) -> Result<Option<String>> {
    let ns = isvc.namespace().unwrap_or_default();
    let name = isvc.name_any();
    let api: Api<Service> = Api::namespaced(client.clone(), &ns);
    let current = api.get_opt(&name).await?;

    if !should_exist(isvc) {
        // Only remove a Service we own as the external endpoint.
        if let Some(cur) = current {
            let ours = cur.labels().get(crate::consts::COMPONENT_LABEL).map(String::as_str)
                == Some(EXTERNAL_SERVICE_COMPONENT);
            if ours {
                match api.delete(&name, &Default::default()).await {
                    Ok(_) => info!(service = %name, "deleted external service"),
                    Err(kube::Error::Api(ae)) if ae.code == 404 => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        return Ok(None);
    }

    let Some(target) = target_component(isvc) else {
        return Ok(None);
    };
    let owner = isvc.controller_owner_ref(&()).unwrap_or_default();
    let desired = desired_external_service(isvc, target, owner);

    match current {
        None => {
            api.patch(
                &name,
                &PatchParams::apply(MANAGER).force(),
                &Patch::Apply(&desired),
            )
            .await?;
            info!(service = %name, target = %target, "created external service");
        }
        Some(cur) if spec_drifted(&cur, &desired) => {
            api.patch(
                &name,
                &PatchParams::apply(MANAGER).force(),
                &Patch::Apply(&desired),
            )
            .await?;
            info!(service = %name, target = %target, "updated drifted external service");
        }
        Some(_) => debug!(service = %name, "external service up to date"),
    }

    Ok(Some(format!("http://{name}.{ns}.svc.cluster.local")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consts::{INGRESS_DISABLE_ANNOTATION, VISIBILITY_CLUSTER_LOCAL, VISIBILITY_LABEL};
    use crate::crd::{ComponentSpec, InferenceServiceSpec, PredictorSpec};

    fn isvc(spec: InferenceServiceSpec, annotations: &[(&str, &str)]) -> InferenceService {
        let mut isvc = InferenceService::new("m1", spec);
        isvc.metadata.namespace = Some("models".into());
        isvc.metadata.annotations = Some(
            annotations
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        isvc
    }

    fn engine_only() -> InferenceServiceSpec {
        InferenceServiceSpec {
            engine: Some(ComponentSpec::default()),
            ..Default::default()
        }
    }

    #[test]
    fn target_prefers_router_then_engine_then_predictor() {
        let spec = InferenceServiceSpec {
            engine: Some(ComponentSpec::default()),
            router: Some(ComponentSpec::default()),
            ..Default::default()
        };
        assert_eq!(
            target_component(&isvc(spec, &[])),
            Some(ComponentKind::Router)
        );
        assert_eq!(
            target_component(&isvc(engine_only(), &[])),
            Some(ComponentKind::Engine)
        );
        let legacy = InferenceServiceSpec {
            predictor: Some(PredictorSpec::default()),
            ..Default::default()
        };
        assert_eq!(
            target_component(&isvc(legacy, &[])),
            Some(ComponentKind::Predictor)
        );
    }

    #[test]
    fn exists_only_when_ingress_disabled_and_not_cluster_local() {
        let on = isvc(engine_only(), &[(INGRESS_DISABLE_ANNOTATION, "true")]);
        assert!(should_exist(&on));

        let ingress_enabled = isvc(engine_only(), &[]);
        assert!(!should_exist(&ingress_enabled));

        let mut local = isvc(engine_only(), &[(INGRESS_DISABLE_ANNOTATION, "true")]);
        local.metadata.labels = Some(BTreeMap::from([(
            VISIBILITY_LABEL.to_string(),
            VISIBILITY_CLUSTER_LOCAL.to_string(),
        )]));
        assert!(!should_exist(&local));

        let no_traffic = isvc(InferenceServiceSpec::default(), &[(INGRESS_DISABLE_ANNOTATION, "true")]);
        assert!(!should_exist(&no_traffic));
    }

    #[test]
    fn desired_service_copies_prefixed_annotations_only() {
        let obj = isvc(
            engine_only(),
            &[
                (INGRESS_DISABLE_ANNOTATION, "true"),
                ("service.beta.kubernetes.io/aws-load-balancer-type", "nlb"),
                ("cloud.google.com/neg", "{\"ingress\":true}"),
                ("unrelated.io/key", "x"),
            ],
        );
        let svc = desired_external_service(
            &obj,
            ComponentKind::Engine,
            OwnerReference::default(),
        );
        let ann = svc.metadata.annotations.unwrap();
        assert_eq!(
            ann.get("service.beta.kubernetes.io/aws-load-balancer-type")
                .map(String::as_str),
            Some("nlb")
        );
        assert!(ann.contains_key("cloud.google.com/neg"));
        assert!(!ann.contains_key("unrelated.io/key"));
        assert!(!ann.contains_key(INGRESS_DISABLE_ANNOTATION));
    }

    #[test]
    fn service_type_honors_annotation_and_defaults_to_cluster_ip() {
        let lb = isvc(
            engine_only(),
            &[
                (INGRESS_DISABLE_ANNOTATION, "true"),
                (SERVICE_TYPE_ANNOTATION, "LoadBalancer"),
            ],
        );
        let svc = desired_external_service(&lb, ComponentKind::Engine, OwnerReference::default());
        assert_eq!(svc.spec.unwrap().type_.as_deref(), Some("LoadBalancer"));

        let bogus = isvc(
            engine_only(),
            &[(SERVICE_TYPE_ANNOTATION, "ExternalName")],
        );
        let svc = desired_external_service(&bogus, ComponentKind::Engine, OwnerReference::default());
        assert_eq!(svc.spec.unwrap().type_.as_deref(), Some("ClusterIP"));
    }

    #[test]
    fn drift_detection_covers_selector_ports_and_type() {
        let obj = isvc(engine_only(), &[(INGRESS_DISABLE_ANNOTATION, "true")]);
        let desired =
            desired_external_service(&obj, ComponentKind::Engine, OwnerReference::default());

        let mut same = desired.clone();
        same.metadata.annotations = None; // metadata drift alone is not spec drift
        assert!(!spec_drifted(&same, &desired));

        let mut retargeted = desired.clone();
        retargeted.spec.as_mut().unwrap().selector =
            Some(child_labels("m1", ComponentKind::Router.label()));
        assert!(spec_drifted(&retargeted, &desired));

        let mut retyped = desired.clone();
        retyped.spec.as_mut().unwrap().type_ = Some("NodePort".into());
        assert!(spec_drifted(&retyped, &desired));
    }
}
