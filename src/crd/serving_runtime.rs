use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::inference_service::PodFields;
use super::{ModelFormat, ModelFramework};

/// One model format a runtime declares it can serve, with the attributes the
/// selector scores on.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SupportedModelFormat {
    /// Format family name, matched against the model's format name.
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_format: Option<ModelFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_framework: Option<ModelFramework>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    /// Whether this entry participates in runtime auto-selection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_select: Option<bool>,
}

/// Parameter-count bounds as human-readable sizes ("1B", "100M").
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSizeRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LeaderPodSpec {
    #[serde(flatten)]
    pub pod: PodFields,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPodSpec {
    #[serde(flatten)]
    pub pod: PodFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i32>,
}

/// Symbolic references to AcceleratorClass resources this runtime needs.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratorRequirements {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub accelerator_classes: Vec<String>,
}

/// The runtime declaration shared by ServingRuntime and ClusterServingRuntime.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub supported_model_formats: Vec<SupportedModelFormat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_size_range: Option<ModelSizeRange>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub protocol_versions: Vec<String>,
    /// Template pod spec merged under user component specs.
    #[serde(flatten)]
    pub pod: PodFields,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_pod_spec: Option<LeaderPodSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub worker_pod_spec: Option<WorkerPodSpec>,
    /// Explicit deployment mode; parsed against the usual mode names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deployment_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accelerator_requirements: Option<AcceleratorRequirements>,
    /// Disabled runtimes are invisible to selection and admission cross-checks.
    #[serde(default)]
    pub disabled: bool,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "serving.modelgrid.dev",
    version = "v1beta1",
    kind = "ServingRuntime",
    plural = "servingruntimes",
    namespaced
)]
pub struct ServingRuntimeSpec {
    #[serde(flatten)]
    pub runtime: RuntimeSpec,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "serving.modelgrid.dev",
    version = "v1beta1",
    kind = "ClusterServingRuntime",
    plural = "clusterservingruntimes"
)]
pub struct ClusterServingRuntimeSpec {
    #[serde(flatten)]
    pub runtime: RuntimeSpec,
}
