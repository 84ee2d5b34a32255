//! Shared constants: API group, labels, annotations, event reasons.

/// API group served by this operator.
pub const API_GROUP: &str = "serving.modelgrid.dev";
pub const API_VERSION: &str = "v1beta1";

/// Field manager for server-side apply.
pub const MANAGER: &str = "inference-operator";

/// Finalizer placed on every InferenceService.
pub const FINALIZER: &str = "inferenceservice.finalizers";

/// Label carrying the owning InferenceService name on every child resource.
pub const INFERENCE_SERVICE_LABEL: &str = "serving.modelgrid.dev/inferenceservice";

/// Label carrying the component role on every child resource.
pub const COMPONENT_LABEL: &str = "component";

/// Component label value reserved for the external Service (not a spec component).
pub const EXTERNAL_SERVICE_COMPONENT: &str = "external-service";

pub const VISIBILITY_LABEL: &str = "serving.modelgrid.dev/visibility";
pub const VISIBILITY_CLUSTER_LOCAL: &str = "cluster-local";

// Recognized InferenceService annotations.
pub const DEPLOYMENT_MODE_ANNOTATION: &str = "serving.modelgrid.dev/deploymentMode";
pub const INGRESS_DISABLE_ANNOTATION: &str = "serving.modelgrid.dev/ingress-disable-creation";
pub const SERVICE_TYPE_ANNOTATION: &str = "serving.modelgrid.dev/service-type";
pub const DEPRECATION_WARNING_ANNOTATION: &str = "serving.modelgrid.dev/deprecation-warning";
pub const ROLLOUT_HASH_ANNOTATION: &str = "serving.modelgrid.dev/rollout-hash";

/// Annotation value written by the predictor migration.
pub const PREDICTOR_DEPRECATION_WARNING: &str = "The Predictor field is deprecated and will \
     be removed in a future release. Please use Engine and Model fields instead.";

/// Annotation prefixes propagated onto the external Service.
pub const PROPAGATED_SERVICE_ANNOTATION_PREFIXES: &[&str] = &[
    "service.beta.kubernetes.io/",
    "cloud.google.com/",
    "service.kubernetes.io/",
];

/// Hugging Face storage URI scheme and probe endpoint.
pub const HF_SCHEME: &str = "hf://";
pub const HF_API_BASE: &str = "https://huggingface.co/api/models";
/// Default key inside a referenced secret holding the Hugging Face token.
pub const HF_TOKEN_SECRET_KEY: &str = "token";

// Event reasons.
pub const EVT_MODEL_RECONCILE_ERROR: &str = "ModelReconcileError";
pub const EVT_RUNTIME_VALIDATION_ERROR: &str = "RuntimeValidationError";
pub const EVT_MERGE_SPECS_ERROR: &str = "MergeSpecsError";
pub const EVT_DEPLOYMENT_MODE_ERROR: &str = "DeploymentModeError";
pub const EVT_SERVERLESS_MODE_REJECTED: &str = "ServerlessModeRejected";
pub const EVT_READY: &str = "InferenceServiceReady";
pub const EVT_NOT_READY: &str = "InferenceServiceNotReady";

// Condition types.
pub const COND_READY: &str = "Ready";
pub const COND_ROUTES_READY: &str = "RoutesReady";
pub const COND_DEPLOYMENT_READY: &str = "LatestDeploymentReady";

/// apiVersion stamped into owner references on children.
pub fn api_version() -> String {
    format!("{API_GROUP}/{API_VERSION}")
}
