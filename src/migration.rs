//! One-shot rewrite of the deprecated `predictor` field into `engine` +
//! `model`, and deferred retirement of the legacy workload.

use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{ListParams, PostParams};
use kube::{Api, Client, ResourceExt};
use tracing::{info, warn};

use crate::consts::{
    COMPONENT_LABEL, DEPRECATION_WARNING_ANNOTATION, INFERENCE_SERVICE_LABEL,
    PREDICTOR_DEPRECATION_WARNING,
};
use crate::crd::{ComponentKind, ComponentSpec, InferenceService, ModelRef};
use crate::error::Result;
use crate::resources::workload_name;

/// Build the migrated object: predictor moved into `engine` + `model`, the
/// deprecation warning annotated. `None` when there is nothing to migrate.
pub fn migrated(isvc: &InferenceService) -> Option<InferenceService> {
    let predictor = isvc.spec.predictor.as_ref()?;

    let mut out = isvc.clone();

    if let Some(model) = &predictor.model {
        if let Some(base_model) = &model.base_model {
            out.spec.model = Some(ModelRef {
                name: base_model.clone(),
                kind: model.kind.clone(),
            });
        }
    }
    out.spec.engine = Some(ComponentSpec {
        pod: predictor.pod.clone(),
        min_replicas: predictor.min_replicas,
        max_replicas: predictor.max_replicas,
        leader: None,
        worker: None,
    });
    out.spec.predictor = None;
    out.metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(
            DEPRECATION_WARNING_ANNOTATION.to_string(),
            PREDICTOR_DEPRECATION_WARNING.to_string(),
        );
    Some(out)
}

/// Rewrite and persist in one update. Returns true when a migration happened;
/// the caller should end the reconcile and let the watch deliver the new spec.
pub async fn migrate(client: &Client, isvc: &InferenceService) -> Result<bool> {
    let Some(rewritten) = migrated(isvc) else {
        return Ok(false);
    };
    let ns = isvc.namespace().unwrap_or_default();
    let api: Api<InferenceService> = Api::namespaced(client.clone(), &ns);
    api.replace(&isvc.name_any(), &PostParams::default(), &rewritten)
        .await?;
    info!(
        isvc = %isvc.name_any(),
        namespace = %ns,
        "migrated legacy predictor to engine + model"
    );
    Ok(true)
}

/// Whether a deployment currently reports `Available=True`.
fn is_available(deploy: &Deployment) -> bool {
    deploy
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conds| {
            conds
                .iter()
                .any(|c| c.type_ == "Available" && c.status == "True")
        })
}

/// Retire the legacy predictor workload once every new component Deployment
/// is Available. Returns `Ok(false)` while retirement has to wait; that is
/// not a failure.
pub async fn cleanup_legacy_workloads(client: &Client, isvc: &InferenceService) -> Result<bool> {
    let ns = isvc.namespace().unwrap_or_default();
    let name = isvc.name_any();
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), &ns);

    // Every declared component must have an Available deployment first.
    let mut required = vec![ComponentKind::Engine];
    if isvc.spec.decoder.is_some() {
        required.push(ComponentKind::Decoder);
    }
    if isvc.spec.router.is_some() {
        required.push(ComponentKind::Router);
    }
    for kind in required {
        match deployments.get_opt(&workload_name(&name, kind)).await? {
            Some(d) if is_available(&d) => {}
            _ => return Ok(false),
        }
    }

    let lp = ListParams::default().labels(&format!(
        "{COMPONENT_LABEL}={}",
        ComponentKind::Predictor.label()
    ));
    let legacy = deployments.list(&lp).await?;
    let mut all_gone = true;
    for d in legacy {
        let d_name = d.name_any();
        let ours = d_name == name
            || d.labels().get(INFERENCE_SERVICE_LABEL).map(String::as_str) == Some(name.as_str());
        if !ours {
            continue;
        }
        match deployments.delete(&d_name, &Default::default()).await {
            Ok(_) => info!(deployment = %d_name, "retired legacy predictor workload"),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => {
                warn!(deployment = %d_name, error = %e, "failed to retire legacy workload");
                all_gone = false;
            }
        }
    }
    Ok(all_gone)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{InferenceServiceSpec, PodFields, PredictorModel, PredictorSpec};
    use k8s_openapi::api::core::v1::Container;

    fn legacy_isvc() -> InferenceService {
        InferenceService::new(
            "sklearn-iris",
            InferenceServiceSpec {
                predictor: Some(PredictorSpec {
                    model: Some(PredictorModel {
                        base_model: Some("sklearn-model".into()),
                        kind: None,
                        storage_uri: Some("gs://b/m".into()),
                    }),
                    pod: PodFields {
                        containers: vec![Container {
                            name: "predictor".into(),
                            image: Some("sklearn:1".into()),
                            ..Default::default()
                        }],
                        ..Default::default()
                    },
                    min_replicas: Some(2),
                    max_replicas: None,
                }),
                ..Default::default()
            },
        )
    }

    #[test]
    fn migration_moves_predictor_into_engine_and_model() {
        let out = migrated(&legacy_isvc()).unwrap();
        assert!(out.spec.predictor.is_none());
        assert_eq!(out.spec.model.as_ref().unwrap().name, "sklearn-model");
        let engine = out.spec.engine.as_ref().unwrap();
        assert_eq!(engine.pod.containers[0].image.as_deref(), Some("sklearn:1"));
        assert_eq!(engine.min_replicas, Some(2));
        assert_eq!(
            out.metadata
                .annotations
                .as_ref()
                .unwrap()
                .get(DEPRECATION_WARNING_ANNOTATION)
                .map(String::as_str),
            Some(PREDICTOR_DEPRECATION_WARNING)
        );
    }

    #[test]
    fn migration_is_a_noop_without_a_predictor() {
        let isvc = InferenceService::new("m1", InferenceServiceSpec::default());
        assert!(migrated(&isvc).is_none());
    }

    #[test]
    fn migration_is_idempotent() {
        let once = migrated(&legacy_isvc()).unwrap();
        assert!(migrated(&once).is_none());
    }
}
