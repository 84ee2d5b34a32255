mod accelerator_class;
mod base_model;
mod inference_service;
mod serving_runtime;

pub use accelerator_class::{AcceleratorClass, AcceleratorClassSpec};
pub use base_model::{
    BaseModel, BaseModelSpec, ClusterBaseModel, ClusterBaseModelSpec, ModelSpec, StorageSpec,
};
pub use inference_service::{
    Addressable, ComponentKind, ComponentSpec, ComponentStatusSpec, Condition, InferenceService,
    InferenceServiceSpec, InferenceServiceStatus, LeaderSpec, ModelRef, PodFields, PredictorModel,
    PredictorSpec, RuntimeRef, WorkerSpec,
};
pub use serving_runtime::{
    AcceleratorRequirements, ClusterServingRuntime, ClusterServingRuntimeSpec, LeaderPodSpec,
    ModelSizeRange, RuntimeSpec, ServingRuntime, ServingRuntimeSpec, SupportedModelFormat,
    WorkerPodSpec,
};

use kube::CustomResourceExt;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a component is realized on the cluster.
#[derive(Deserialize, Serialize, Clone, Copy, Debug, JsonSchema, PartialEq, Eq)]
pub enum DeploymentMode {
    RawDeployment,
    MultiNode,
    Serverless,
    VirtualDeployment,
}

impl DeploymentMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "RawDeployment" => Some(Self::RawDeployment),
            "MultiNode" => Some(Self::MultiNode),
            "Serverless" => Some(Self::Serverless),
            "VirtualDeployment" => Some(Self::VirtualDeployment),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeploymentMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::RawDeployment => "RawDeployment",
            Self::MultiNode => "MultiNode",
            Self::Serverless => "Serverless",
            Self::VirtualDeployment => "VirtualDeployment",
        };
        f.write_str(s)
    }
}

/// A model serialization format, e.g. `safetensors` v1.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct ModelFormat {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// A model training/serving framework, e.g. `transformers` 4.x.
#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema, PartialEq, Eq)]
pub struct ModelFramework {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

/// Emit every CRD served by this operator, stripped of schemars `format`
/// annotations that OLM dislikes.
pub fn print_crds_without_formats() -> anyhow::Result<()> {
    for crd in [
        InferenceService::crd(),
        ServingRuntime::crd(),
        ClusterServingRuntime::crd(),
        BaseModel::crd(),
        ClusterBaseModel::crd(),
        AcceleratorClass::crd(),
    ] {
        let mut v = serde_json::to_value(&crd)?;
        strip_format_keys(&mut v);
        println!("---");
        print!("{}", serde_yaml::to_string(&v)?);
    }
    Ok(())
}

fn strip_format_keys(v: &mut serde_json::Value) {
    use serde_json::Value::*;
    match v {
        Object(map) => {
            map.remove("format");
            for val in map.values_mut() {
                strip_format_keys(val);
            }
        }
        Array(arr) => {
            for val in arr {
                strip_format_keys(val);
            }
        }
        _ => {}
    }
}
