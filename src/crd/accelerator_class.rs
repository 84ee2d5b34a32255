use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A named accelerator profile runtimes can require. Only existence matters to
/// this operator; scheduling against it is someone else's job.
#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "serving.modelgrid.dev",
    version = "v1beta1",
    kind = "AcceleratorClass",
    plural = "acceleratorclasses"
)]
#[serde(rename_all = "camelCase")]
pub struct AcceleratorClassSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family: Option<String>,
    /// Device memory per accelerator, human-readable ("80Gi").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
}
