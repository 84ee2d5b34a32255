use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Affinity, Container, Toleration, Volume};
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::consts::{
    DEPLOYMENT_MODE_ANNOTATION, INGRESS_DISABLE_ANNOTATION, VISIBILITY_CLUSTER_LOCAL,
    VISIBILITY_LABEL,
};

use super::DeploymentMode;

/// Top-level spec for the InferenceService custom resource: a model reference,
/// an optional runtime pin, and up to three component specs.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "serving.modelgrid.dev",
    version = "v1beta1",
    kind = "InferenceService",
    plural = "inferenceservices",
    shortname = "isvc",
    namespaced
)]
#[kube(status = "InferenceServiceStatus")]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceSpec {
    /// Reference to the BaseModel or ClusterBaseModel being served.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<ModelRef>,
    /// Pins a ServingRuntime by name instead of auto-selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeRef>,
    /// Prefill component, or the whole serving workload when deployed alone.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine: Option<ComponentSpec>,
    /// Decode-phase component; presence makes the deployment PD-disaggregated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decoder: Option<ComponentSpec>,
    /// Traffic-fronting component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub router: Option<ComponentSpec>,
    /// Deprecated. Rewritten into `engine` + `model` on first reconcile.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predictor: Option<PredictorSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelRef {
    pub name: String,
    /// `BaseModel` or `ClusterBaseModel`; unset means look up both, namespaced first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct RuntimeRef {
    pub name: String,
}

/// The pod-template fragment shared by components, leaders and workers.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PodFields {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub containers: Vec<Container>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volumes: Option<Vec<Volume>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<BTreeMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affinity: Option<Affinity>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentSpec {
    #[serde(flatten)]
    pub pod: PodFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
    /// Leader sub-spec; presence switches the component to MultiNode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<LeaderSpec>,
    /// Worker sub-spec; presence switches the component to MultiNode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker: Option<WorkerSpec>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderSpec {
    #[serde(flatten)]
    pub pod: PodFields,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerSpec {
    #[serde(flatten)]
    pub pod: PodFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,
}

/// Legacy single-component spec, kept only for migration.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<PredictorModel>,
    #[serde(flatten)]
    pub pod: PodFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_replicas: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<i32>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PredictorModel {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
}

/// Component roles tracked in status. `Predictor` only appears for legacy and
/// virtual-mode objects.
#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq, PartialOrd, Ord,
)]
pub enum ComponentKind {
    Engine,
    Decoder,
    Router,
    Predictor,
}

impl ComponentKind {
    /// Value of the `component` label on children of this role.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Engine => "engine",
            Self::Decoder => "decoder",
            Self::Router => "router",
            Self::Predictor => "predictor",
        }
    }

    /// Suffix of workload/service names, `<isvc>-<suffix>`.
    pub fn suffix(&self) -> &'static str {
        self.label()
    }
}

impl std::fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
pub struct Addressable {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComponentStatusSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InferenceServiceStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<Addressable>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<Condition>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub components: Option<BTreeMap<ComponentKind, ComponentStatusSpec>>,
    /// Name of the resolved ServingRuntime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_name: Option<String>,
    /// Name of the winning supported model format.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_format: Option<String>,
}

impl InferenceService {
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(key))
            .map(String::as_str)
    }

    /// Deployment mode requested on the object itself, if any.
    pub fn requested_mode(&self) -> Option<DeploymentMode> {
        self.annotation(DEPLOYMENT_MODE_ANNOTATION)
            .and_then(DeploymentMode::parse)
    }

    /// Literal `"true"` only.
    pub fn ingress_disabled(&self) -> bool {
        self.annotation(INGRESS_DISABLE_ANNOTATION) == Some("true")
    }

    pub fn is_cluster_local(&self) -> bool {
        self.labels().get(VISIBILITY_LABEL).map(String::as_str)
            == Some(VISIBILITY_CLUSTER_LOCAL)
    }

    pub fn component_spec(&self, kind: ComponentKind) -> Option<&ComponentSpec> {
        match kind {
            ComponentKind::Engine => self.spec.engine.as_ref(),
            ComponentKind::Decoder => self.spec.decoder.as_ref(),
            ComponentKind::Router => self.spec.router.as_ref(),
            ComponentKind::Predictor => None,
        }
    }

    /// A component able to receive inference traffic: router, engine, or the
    /// legacy predictor.
    pub fn has_traffic_component(&self) -> bool {
        self.spec.router.is_some() || self.spec.engine.is_some() || self.spec.predictor.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isvc_with_annotations(pairs: &[(&str, &str)]) -> InferenceService {
        let mut isvc = InferenceService::new("m1", InferenceServiceSpec::default());
        isvc.metadata.annotations = Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        isvc
    }

    #[test]
    fn requested_mode_parses_known_values() {
        let isvc =
            isvc_with_annotations(&[(DEPLOYMENT_MODE_ANNOTATION, "VirtualDeployment")]);
        assert_eq!(isvc.requested_mode(), Some(DeploymentMode::VirtualDeployment));

        let isvc = isvc_with_annotations(&[(DEPLOYMENT_MODE_ANNOTATION, "bogus")]);
        assert_eq!(isvc.requested_mode(), None);
    }

    #[test]
    fn ingress_disabled_is_literal_true_only() {
        assert!(isvc_with_annotations(&[(INGRESS_DISABLE_ANNOTATION, "true")]).ingress_disabled());
        assert!(!isvc_with_annotations(&[(INGRESS_DISABLE_ANNOTATION, "True")]).ingress_disabled());
        assert!(!isvc_with_annotations(&[(INGRESS_DISABLE_ANNOTATION, "1")]).ingress_disabled());
        assert!(!isvc_with_annotations(&[]).ingress_disabled());
    }

    #[test]
    fn component_kind_labels_are_stable() {
        assert_eq!(ComponentKind::Engine.label(), "engine");
        assert_eq!(ComponentKind::Decoder.label(), "decoder");
        assert_eq!(ComponentKind::Router.label(), "router");
        assert_eq!(ComponentKind::Predictor.label(), "predictor");
    }
}
