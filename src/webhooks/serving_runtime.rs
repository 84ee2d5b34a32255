//! Admission validation for ServingRuntime and ClusterServingRuntime:
//! internal consistency, cross-runtime priority uniqueness, and accelerator
//! class referential integrity.

use std::collections::HashSet;

use axum::Json;
use axum::extract::State;
use kube::api::{DynamicObject, ListParams};
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::{Api, ResourceExt};
use tracing::warn;

use crate::crd::{
    AcceleratorClass, ClusterServingRuntime, DeploymentMode, RuntimeSpec, ServingRuntime,
    SupportedModelFormat,
};

use super::WebhookState;

/// Invariant (a): within one runtime, two formats of the same name that are
/// both auto-selectable and both prioritized must agree on priority.
/// Invariant (d): multi-node configuration coherence.
pub fn validate_internal(spec: &RuntimeSpec) -> Result<(), String> {
    for (i, a) in spec.supported_model_formats.iter().enumerate() {
        for b in &spec.supported_model_formats[i + 1..] {
            if a.name == b.name
                && a.auto_select == Some(true)
                && b.auto_select == Some(true)
                && a.priority.is_some()
                && b.priority.is_some()
                && a.priority != b.priority
            {
                return Err(format!(
                    "conflicting priorities for the model format {}: {} and {}",
                    a.name,
                    a.priority.unwrap(),
                    b.priority.unwrap()
                ));
            }
        }
    }

    let explicit_mode = spec.deployment_mode.as_deref().and_then(DeploymentMode::parse);
    let worker_size = spec.worker_pod_spec.as_ref().and_then(|w| w.size);
    let multi_node = worker_size.unwrap_or(0) > 0 || explicit_mode == Some(DeploymentMode::MultiNode);
    if multi_node {
        if spec.leader_pod_spec.is_none() || spec.worker_pod_spec.is_none() {
            return Err(
                "multi-node runtimes must define both a leader and a worker pod spec".into(),
            );
        }
        if worker_size.unwrap_or(0) <= 0 {
            return Err("multi-node runtimes must declare a worker size greater than zero".into());
        }
    }
    if explicit_mode == Some(DeploymentMode::RawDeployment) && spec.worker_pod_spec.is_some() {
        return Err("raw-deployment runtimes must not declare a worker pod spec".into());
    }
    Ok(())
}

fn formats_equal(a: &SupportedModelFormat, b: &SupportedModelFormat) -> bool {
    a.name == b.name
        && a.version == b.version
        && a.quantization == b.quantization
        && a.model_format == b.model_format
        && a.model_framework == b.model_framework
        && a.model_architecture == b.model_architecture
}

fn share_protocol(a: &RuntimeSpec, b: &RuntimeSpec) -> bool {
    a.protocol_versions
        .iter()
        .any(|p| b.protocol_versions.contains(p))
}

/// Invariant (b): across enabled runtimes sharing a protocol, the same format
/// must not be auto-selectable with the same size range and the same priority
/// in two places; equal priorities make auto-selection ambiguous.
pub fn validate_against_peers(
    spec: &RuntimeSpec,
    peers: &[(String, RuntimeSpec)],
) -> Result<(), String> {
    for (peer_name, peer) in peers {
        if peer.disabled || !share_protocol(spec, peer) {
            continue;
        }
        if spec.model_size_range != peer.model_size_range {
            continue;
        }
        for mine in &spec.supported_model_formats {
            if mine.auto_select != Some(true) {
                continue;
            }
            for theirs in &peer.supported_model_formats {
                if theirs.auto_select == Some(true)
                    && formats_equal(mine, theirs)
                    && mine.priority == theirs.priority
                {
                    return Err(format!(
                        "same priority assigned for the model format {} by runtime {peer_name}",
                        mine.name
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Invariant (c): names with no backing AcceleratorClass.
pub fn missing_accelerator_classes(spec: &RuntimeSpec, existing: &HashSet<String>) -> Vec<String> {
    spec.accelerator_requirements
        .as_ref()
        .map(|req| {
            req.accelerator_classes
                .iter()
                .filter(|name| !existing.contains(*name))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

async fn accelerator_class_names(state: &WebhookState) -> Result<HashSet<String>, kube::Error> {
    let api: Api<AcceleratorClass> = Api::all(state.client.clone());
    Ok(api
        .list(&ListParams::default())
        .await?
        .items
        .into_iter()
        .map(|ac| ac.name_any())
        .collect())
}

async fn validate_runtime_spec(
    state: &WebhookState,
    name: &str,
    spec: &RuntimeSpec,
    peers: Vec<(String, RuntimeSpec)>,
) -> Result<(), String> {
    // Disabled runtimes are invisible: no checks.
    if spec.disabled {
        return Ok(());
    }
    validate_internal(spec)?;

    let existing = accelerator_class_names(state)
        .await
        .map_err(|e| format!("failed to list accelerator classes: {e}"))?;
    let missing = missing_accelerator_classes(spec, &existing);
    if !missing.is_empty() {
        return Err(format!(
            "runtime {name} references unknown accelerator classes: {}",
            missing.join(", ")
        ));
    }

    validate_against_peers(spec, &peers)
}

pub async fn validate_serving_runtime(
    State(state): State<WebhookState>,
    Json(review): Json<AdmissionReview<ServingRuntime>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<ServingRuntime> = match review.try_into() {
        Ok(req) => req,
        Err(e) => return Json(AdmissionResponse::invalid(e.to_string()).into_review()),
    };
    let resp = AdmissionResponse::from(&req);

    let Some(rt) = &req.object else {
        return Json(resp.into_review());
    };
    let name = rt.name_any();
    let ns = rt
        .namespace()
        .or_else(|| req.namespace.clone())
        .unwrap_or_default();

    let peers = {
        let api: Api<ServingRuntime> = Api::namespaced(state.client.clone(), &ns);
        match api.list(&ListParams::default()).await {
            Ok(list) => list
                .items
                .into_iter()
                .filter(|p| p.name_any() != name)
                .map(|p| (p.name_any(), p.spec.runtime))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list peer runtimes");
                Vec::new()
            }
        }
    };

    match validate_runtime_spec(&state, &name, &rt.spec.runtime, peers).await {
        Ok(()) => Json(resp.into_review()),
        Err(reason) => Json(resp.deny(reason).into_review()),
    }
}

pub async fn validate_cluster_serving_runtime(
    State(state): State<WebhookState>,
    Json(review): Json<AdmissionReview<ClusterServingRuntime>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<ClusterServingRuntime> = match review.try_into() {
        Ok(req) => req,
        Err(e) => return Json(AdmissionResponse::invalid(e.to_string()).into_review()),
    };
    let resp = AdmissionResponse::from(&req);

    let Some(rt) = &req.object else {
        return Json(resp.into_review());
    };
    let name = rt.name_any();

    let peers = {
        let api: Api<ClusterServingRuntime> = Api::all(state.client.clone());
        match api.list(&ListParams::default()).await {
            Ok(list) => list
                .items
                .into_iter()
                .filter(|p| p.name_any() != name)
                .map(|p| (p.name_any(), p.spec.runtime))
                .collect(),
            Err(e) => {
                warn!(error = %e, "failed to list peer cluster runtimes");
                Vec::new()
            }
        }
    };

    match validate_runtime_spec(&state, &name, &rt.spec.runtime, peers).await {
        Ok(()) => Json(resp.into_review()),
        Err(reason) => Json(resp.deny(reason).into_review()),
    }
}
