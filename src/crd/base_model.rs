use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{ModelFormat, ModelFramework};

/// Where the model weights live and how to authenticate to fetch them.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage_uri: Option<String>,
    /// Secret holding credentials for the storage backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_ref: Option<String>,
    /// Key inside the secret; defaults to `token` for Hugging Face.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// The model declaration shared by BaseModel and ClusterBaseModel.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModelSpec {
    pub model_format: ModelFormat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_framework: Option<ModelFramework>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_architecture: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantization: Option<String>,
    /// Parameter count, e.g. "7B" or "350M".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_parameter_size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageSpec>,
    #[serde(default)]
    pub disabled: bool,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "serving.modelgrid.dev",
    version = "v1beta1",
    kind = "BaseModel",
    plural = "basemodels",
    namespaced
)]
pub struct BaseModelSpec {
    #[serde(flatten)]
    pub model: ModelSpec,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "serving.modelgrid.dev",
    version = "v1beta1",
    kind = "ClusterBaseModel",
    plural = "clusterbasemodels"
)]
pub struct ClusterBaseModelSpec {
    #[serde(flatten)]
    pub model: ModelSpec,
}
