//! Per-component reconcilers invoked by the main loop, plus the generic
//! readiness reads the status propagation uses.
//!
//! RawDeployment renders a Deployment + Service; MultiNode renders a
//! LeaderWorkerSet and Serverless a Knative Service, both as dynamic objects
//! so the operator never links against optional APIs.

use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::autoscaling::v2::HorizontalPodAutoscaler;
use k8s_openapi::api::core::v1::Service;
use kube::api::{ApiResource, DynamicObject, Patch, PatchParams};
use kube::{Api, Client, Resource, ResourceExt};
use tracing::{debug, info};

use crate::consts::{MANAGER, ROLLOUT_HASH_ANNOTATION};
use crate::crd::{ComponentKind, ComponentSpec, DeploymentMode, InferenceService};
use crate::discovery::{knative_service_gvk, leader_worker_set_gvk};
use crate::error::{Error, Result};
use crate::resources::{
    autoscaling_enabled, child_labels, component_deployment, component_hpa, component_ingress,
    component_service, pod_fields_to_pod_spec, rollout_fingerprint, workload_name,
};

/// Outcome of one opaque component reconcile. A requeue means "come back in
/// `d`, and do not persist partial state in the meantime".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentOutcome {
    Applied,
    Requeue(Duration),
}

/// Per-component readiness, `None` meaning the condition is not reported yet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ComponentReadiness {
    pub routes_ready: Option<bool>,
    pub deployment_ready: Option<bool>,
}

pub async fn reconcile_component(
    client: &Client,
    isvc: &InferenceService,
    kind: ComponentKind,
    spec: &ComponentSpec,
    mode: DeploymentMode,
) -> Result<ComponentOutcome> {
    match mode {
        DeploymentMode::RawDeployment => reconcile_raw(client, isvc, kind, spec).await,
        DeploymentMode::MultiNode => reconcile_multi_node(client, isvc, kind, spec).await,
        DeploymentMode::Serverless => reconcile_serverless(client, isvc, kind, spec).await,
        DeploymentMode::VirtualDeployment => Err(Error::DeploymentMode(
            "virtual deployments are short-circuited before component reconcile".into(),
        )),
    }
}

async fn reconcile_raw(
    client: &Client,
    isvc: &InferenceService,
    kind: ComponentKind,
    spec: &ComponentSpec,
) -> Result<ComponentOutcome> {
    let ns = isvc.namespace().unwrap_or_default();
    let name = isvc.name_any();
    let owner = isvc
        .controller_owner_ref(&())
        .ok_or_else(|| Error::DeploymentMode("object has no controller owner identity".into()))?;
    let pp = PatchParams::apply(MANAGER).force();

    let deploy = component_deployment(&name, kind, spec, owner.clone());
    let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), &ns);
    deploy_api
        .patch(&workload_name(&name, kind), &pp, &Patch::Apply(&deploy))
        .await?;

    let svc = component_service(&name, kind, owner.clone());
    let svc_api: Api<Service> = Api::namespaced(client.clone(), &ns);
    svc_api
        .patch(&workload_name(&name, kind), &pp, &Patch::Apply(&svc))
        .await?;

    let hpa_api: Api<HorizontalPodAutoscaler> = Api::namespaced(client.clone(), &ns);
    if autoscaling_enabled(spec) {
        let hpa = component_hpa(&name, kind, spec, owner);
        hpa_api
            .patch(&workload_name(&name, kind), &pp, &Patch::Apply(&hpa))
            .await?;
    } else {
        match hpa_api
            .delete(&workload_name(&name, kind), &Default::default())
            .await
        {
            Ok(_) => debug!(component = %kind, isvc = %name, "removed stale autoscaler"),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
    }

    debug!(component = %kind, isvc = %name, "applied raw deployment");
    Ok(ComponentOutcome::Applied)
}

/// LeaderWorkerSet group size includes the leader.
fn leader_worker_set_body(
    isvc_name: &str,
    kind: ComponentKind,
    spec: &ComponentSpec,
) -> Result<serde_json::Value> {
    let labels = child_labels(isvc_name, kind.label());
    let leader_pod = spec.leader.as_ref().map(|l| &l.pod).unwrap_or(&spec.pod);
    let worker = spec
        .worker
        .as_ref()
        .ok_or_else(|| Error::MergeSpecs(format!("{kind} requests MultiNode without a worker")))?;
    let size = worker.size.unwrap_or(1) + 1;

    Ok(serde_json::json!({
        "replicas": spec.min_replicas.unwrap_or(1),
        "leaderWorkerTemplate": {
            "size": size,
            "leaderTemplate": {
                "metadata": {
                    "labels": labels.clone(),
                    "annotations": { ROLLOUT_HASH_ANNOTATION: rollout_fingerprint(leader_pod) },
                },
                "spec": serde_json::to_value(pod_fields_to_pod_spec(leader_pod))?,
            },
            "workerTemplate": {
                "metadata": { "labels": labels },
                "spec": serde_json::to_value(pod_fields_to_pod_spec(&worker.pod))?,
            },
        },
    }))
}

async fn reconcile_multi_node(
    client: &Client,
    isvc: &InferenceService,
    kind: ComponentKind,
    spec: &ComponentSpec,
) -> Result<ComponentOutcome> {
    let ns = isvc.namespace().unwrap_or_default();
    let name = isvc.name_any();
    let owner = isvc
        .controller_owner_ref(&())
        .ok_or_else(|| Error::DeploymentMode("object has no controller owner identity".into()))?;

    let gvk = leader_worker_set_gvk();
    let ar = ApiResource::from_gvk(&gvk);
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), &ns, &ar);
    let lws_name = workload_name(&name, kind);

    let mut obj = DynamicObject::new(&lws_name, &ar);
    obj.metadata.namespace = Some(ns.clone());
    obj.metadata.labels = Some(child_labels(&name, kind.label()));
    obj.metadata.owner_references = Some(vec![owner.clone()]);
    obj.data = serde_json::json!({ "spec": leader_worker_set_body(&name, kind, spec)? });

    let first_apply = api.get_opt(&lws_name).await?.is_none();
    api.patch(
        &lws_name,
        &PatchParams::apply(MANAGER).force(),
        &Patch::Apply(&obj),
    )
    .await?;

    // The leader still gets a fronting service.
    let svc = component_service(&name, kind, owner);
    let svc_api: Api<Service> = Api::namespaced(client.clone(), &ns);
    svc_api
        .patch(
            &workload_name(&name, kind),
            &PatchParams::apply(MANAGER).force(),
            &Patch::Apply(&svc),
        )
        .await?;

    if first_apply {
        info!(component = %kind, isvc = %name, "created leader/worker set");
        return Ok(ComponentOutcome::Requeue(Duration::from_secs(10)));
    }
    Ok(ComponentOutcome::Applied)
}

async fn reconcile_serverless(
    client: &Client,
    isvc: &InferenceService,
    kind: ComponentKind,
    spec: &ComponentSpec,
) -> Result<ComponentOutcome> {
    let ns = isvc.namespace().unwrap_or_default();
    let name = isvc.name_any();
    let owner = isvc
        .controller_owner_ref(&())
        .ok_or_else(|| Error::DeploymentMode("object has no controller owner identity".into()))?;

    let gvk = knative_service_gvk();
    let ar = ApiResource::from_gvk(&gvk);
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), &ns, &ar);
    let ksvc_name = workload_name(&name, kind);

    let mut obj = DynamicObject::new(&ksvc_name, &ar);
    obj.metadata.namespace = Some(ns.clone());
    obj.metadata.labels = Some(child_labels(&name, kind.label()));
    obj.metadata.owner_references = Some(vec![owner]);
    obj.data = serde_json::json!({
        "spec": {
            "template": {
                "metadata": {
                    "labels": child_labels(&name, kind.label()),
                    "annotations": { ROLLOUT_HASH_ANNOTATION: rollout_fingerprint(&spec.pod) },
                },
                "spec": serde_json::to_value(pod_fields_to_pod_spec(&spec.pod))?,
            },
        },
    });

    let first_apply = api.get_opt(&ksvc_name).await?.is_none();
    api.patch(
        &ksvc_name,
        &PatchParams::apply(MANAGER).force(),
        &Patch::Apply(&obj),
    )
    .await?;

    if first_apply {
        info!(component = %kind, isvc = %name, "created serverless revision");
        return Ok(ComponentOutcome::Requeue(Duration::from_secs(10)));
    }
    Ok(ComponentOutcome::Applied)
}

/// Converge the object-level ingress for the ingress-target component.
/// Serverless routing belongs to Knative, so only raw and multi-node targets
/// get one.
pub async fn reconcile_ingress(
    client: &Client,
    isvc: &InferenceService,
    target: Option<ComponentKind>,
    mode: DeploymentMode,
) -> Result<()> {
    use k8s_openapi::api::networking::v1::Ingress;

    let ns = isvc.namespace().unwrap_or_default();
    let name = isvc.name_any();
    let api: Api<Ingress> = Api::namespaced(client.clone(), &ns);

    let wanted = !isvc.ingress_disabled()
        && !isvc.is_cluster_local()
        && mode != DeploymentMode::Serverless;

    let Some(target) = target.filter(|_| wanted) else {
        match api.delete(&name, &Default::default()).await {
            Ok(_) => info!(ingress = %name, "deleted ingress"),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => return Err(e.into()),
        }
        return Ok(());
    };

    let owner = isvc
        .controller_owner_ref(&())
        .ok_or_else(|| Error::DeploymentMode("object has no controller owner identity".into()))?;
    let ingress = component_ingress(&name, &ns, target, owner);
    api.patch(
        &name,
        &PatchParams::apply(MANAGER).force(),
        &Patch::Apply(&ingress),
    )
    .await?;
    Ok(())
}

/// Read a condition status out of an untyped child's `status.conditions`.
pub fn dynamic_condition(obj: &DynamicObject, type_: &str) -> Option<bool> {
    let conds = obj.data.get("status")?.get("conditions")?.as_array()?;
    let cond = conds
        .iter()
        .find(|c| c.get("type").and_then(|t| t.as_str()) == Some(type_))?;
    match cond.get("status").and_then(|s| s.as_str()) {
        Some("True") => Some(true),
        Some("False") => Some(false),
        _ => None,
    }
}

fn deployment_condition(deploy: &Deployment, type_: &str) -> Option<bool> {
    let conds = deploy.status.as_ref()?.conditions.as_ref()?;
    let cond = conds.iter().find(|c| c.type_ == type_)?;
    match cond.status.as_str() {
        "True" => Some(true),
        "False" => Some(false),
        _ => None,
    }
}

/// Readiness of one component's workload, by mode.
pub async fn component_readiness(
    client: &Client,
    isvc: &InferenceService,
    kind: ComponentKind,
    mode: DeploymentMode,
) -> Result<ComponentReadiness> {
    let ns = isvc.namespace().unwrap_or_default();
    let name = workload_name(&isvc.name_any(), kind);

    match mode {
        DeploymentMode::RawDeployment => {
            let deploy_api: Api<Deployment> = Api::namespaced(client.clone(), &ns);
            let svc_api: Api<Service> = Api::namespaced(client.clone(), &ns);
            let deployment_ready = deploy_api
                .get_opt(&name)
                .await?
                .as_ref()
                .and_then(|d| deployment_condition(d, "Available"));
            let routes_ready = Some(svc_api.get_opt(&name).await?.is_some());
            Ok(ComponentReadiness {
                routes_ready,
                deployment_ready,
            })
        }
        DeploymentMode::MultiNode => {
            let ar = ApiResource::from_gvk(&leader_worker_set_gvk());
            let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), &ns, &ar);
            let svc_api: Api<Service> = Api::namespaced(client.clone(), &ns);
            let deployment_ready = api
                .get_opt(&name)
                .await?
                .as_ref()
                .and_then(|o| dynamic_condition(o, "Available"));
            let routes_ready = Some(svc_api.get_opt(&name).await?.is_some());
            Ok(ComponentReadiness {
                routes_ready,
                deployment_ready,
            })
        }
        DeploymentMode::Serverless => {
            let ar = ApiResource::from_gvk(&knative_service_gvk());
            let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), &ns, &ar);
            let ksvc = api.get_opt(&name).await?;
            Ok(ComponentReadiness {
                routes_ready: ksvc.as_ref().and_then(|o| dynamic_condition(o, "RoutesReady")),
                deployment_ready: ksvc
                    .as_ref()
                    .and_then(|o| dynamic_condition(o, "ConfigurationsReady")),
            })
        }
        DeploymentMode::VirtualDeployment => Ok(ComponentReadiness {
            routes_ready: Some(true),
            deployment_ready: Some(true),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{LeaderSpec, PodFields, WorkerSpec};
    use k8s_openapi::api::core::v1::Container;

    #[test]
    fn dynamic_condition_reads_untyped_status() {
        let ar = ApiResource::from_gvk(&leader_worker_set_gvk());
        let mut obj = DynamicObject::new("m1-engine", &ar);
        obj.data = serde_json::json!({
            "status": { "conditions": [
                { "type": "Available", "status": "True" },
                { "type": "Progressing", "status": "False" },
            ]},
        });
        assert_eq!(dynamic_condition(&obj, "Available"), Some(true));
        assert_eq!(dynamic_condition(&obj, "Progressing"), Some(false));
        assert_eq!(dynamic_condition(&obj, "Ready"), None);
    }

    #[test]
    fn leader_worker_set_counts_the_leader_in_group_size() {
        let spec = ComponentSpec {
            pod: PodFields {
                containers: vec![Container {
                    name: "engine".into(),
                    image: Some("vllm:v0.8".into()),
                    ..Default::default()
                }],
                ..Default::default()
            },
            leader: Some(LeaderSpec::default()),
            worker: Some(WorkerSpec {
                size: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        let body = leader_worker_set_body("m1", ComponentKind::Engine, &spec).unwrap();
        assert_eq!(body["leaderWorkerTemplate"]["size"], 3);
        assert_eq!(body["replicas"], 1);
    }

    #[test]
    fn multi_node_without_worker_is_a_merge_error() {
        let spec = ComponentSpec {
            leader: Some(LeaderSpec::default()),
            ..Default::default()
        };
        assert!(leader_worker_set_body("m1", ComponentKind::Engine, &spec).is_err());
    }
}
