//! Admission validation for BaseModel and ClusterBaseModel: Hugging Face URI
//! shape, plus a fail-open existence probe against the HF API. Only a 404 is
//! positive evidence of a missing model; everything else admits, at most with
//! a warning.

use std::sync::OnceLock;

use axum::Json;
use axum::extract::State;
use k8s_openapi::api::core::v1::Secret;
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::{Api, ResourceExt};
use regex::Regex;
use tracing::{debug, warn};

use crate::consts::{HF_API_BASE, HF_SCHEME, HF_TOKEN_SECRET_KEY};
use crate::crd::{BaseModel, ClusterBaseModel, ModelSpec, StorageSpec};

use super::WebhookState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HfModelId {
    pub org: String,
    pub repo: String,
    pub branch: Option<String>,
}

impl std::fmt::Display for HfModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.org, self.repo)
    }
}

fn hf_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9_.-]{1,96})/([A-Za-z0-9_.-]{1,96})(?:@([A-Za-z0-9_./-]+))?$")
            .expect("hf id regex")
    })
}

/// Parse `hf://<org>/<repo>[@branch]`. Callers gate on the scheme first.
pub fn parse_hf_uri(uri: &str) -> Result<HfModelId, String> {
    let rest = uri
        .strip_prefix(HF_SCHEME)
        .ok_or_else(|| format!("not a Hugging Face URI: {uri}"))?;
    let caps = hf_id_regex()
        .captures(rest)
        .ok_or_else(|| format!("invalid Hugging Face model id {rest:?}: expected <org>/<repo>"))?;
    Ok(HfModelId {
        org: caps[1].to_string(),
        repo: caps[2].to_string(),
        branch: caps.get(3).map(|m| m.as_str().to_string()),
    })
}

/// Outcome of the existence probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeOutcome {
    Allowed,
    AllowedWithWarning(String),
    Denied(String),
}

/// Map an HTTP status (or `None` for network error/timeout) to an admission
/// outcome. Fail-open: only a definite 404 denies.
pub fn map_probe_status(status: Option<u16>, id: &HfModelId) -> ProbeOutcome {
    match status {
        Some(200..=299) => ProbeOutcome::Allowed,
        Some(401) | Some(403) => ProbeOutcome::AllowedWithWarning(format!(
            "model {id} may require authentication; existence could not be verified"
        )),
        Some(404) => ProbeOutcome::Denied(format!("model {id} does not exist on Hugging Face")),
        Some(code) => ProbeOutcome::AllowedWithWarning(format!(
            "Hugging Face returned {code} probing model {id}; admitting without verification"
        )),
        None => ProbeOutcome::AllowedWithWarning(format!(
            "could not reach Hugging Face to verify model {id}; admitting without verification"
        )),
    }
}

pub async fn probe_hf_model(
    http: &reqwest::Client,
    id: &HfModelId,
    token: Option<&str>,
) -> ProbeOutcome {
    let url = format!("{HF_API_BASE}/{}/{}", id.org, id.repo);
    let mut req = http.head(&url);
    if let Some(token) = token {
        req = req.bearer_auth(token);
    }
    match req.send().await {
        Ok(resp) => map_probe_status(Some(resp.status().as_u16()), id),
        Err(e) => {
            debug!(error = %e, model = %id, "hugging face probe failed");
            map_probe_status(None, id)
        }
    }
}

/// Resolve the probe token: the referenced secret when resolvable, otherwise
/// the HF_TOKEN environment fallback. Secret trouble is a warning, never a
/// denial.
async fn resolve_token(
    state: &WebhookState,
    namespace: Option<&str>,
    storage: &StorageSpec,
) -> (Option<String>, Option<String>) {
    if let (Some(secret_name), Some(ns)) = (storage.secret_ref.as_deref(), namespace) {
        let api: Api<Secret> = Api::namespaced(state.client.clone(), ns);
        let key = storage.key.as_deref().unwrap_or(HF_TOKEN_SECRET_KEY);
        match api.get_opt(secret_name).await {
            Ok(Some(secret)) => {
                let value = secret
                    .data
                    .as_ref()
                    .and_then(|d| d.get(key))
                    .and_then(|b| String::from_utf8(b.0.clone()).ok());
                match value {
                    Some(token) => return (Some(token), None),
                    None => {
                        return (
                            None,
                            Some(format!("secret {secret_name} has no usable key {key}")),
                        );
                    }
                }
            }
            Ok(None) => {
                return (None, Some(format!("token secret {secret_name} not found")));
            }
            Err(e) => {
                return (
                    None,
                    Some(format!("failed to read token secret {secret_name}: {e}")),
                );
            }
        }
    }
    (std::env::var("HF_TOKEN").ok(), None)
}

/// Shared validation for both model kinds. Returns denial reason or warnings.
async fn validate_model_spec(
    state: &WebhookState,
    namespace: Option<&str>,
    model: &ModelSpec,
) -> Result<Vec<String>, String> {
    let Some(storage) = &model.storage else {
        return Ok(Vec::new());
    };
    let Some(uri) = storage.storage_uri.as_deref() else {
        return Ok(Vec::new());
    };
    if !uri.starts_with(HF_SCHEME) {
        return Ok(Vec::new());
    }

    let id = parse_hf_uri(uri)?;
    let mut warnings = Vec::new();

    let (token, token_warning) = resolve_token(state, namespace, storage).await;
    warnings.extend(token_warning);

    match probe_hf_model(&state.http, &id, token.as_deref()).await {
        ProbeOutcome::Allowed => {}
        ProbeOutcome::AllowedWithWarning(w) => warnings.push(w),
        ProbeOutcome::Denied(reason) => return Err(reason),
    }
    Ok(warnings)
}

fn with_warnings(mut resp: AdmissionResponse, warnings: Vec<String>) -> AdmissionResponse {
    if !warnings.is_empty() {
        resp.warnings = Some(warnings);
    }
    resp
}

pub async fn validate_base_model(
    State(state): State<WebhookState>,
    Json(review): Json<AdmissionReview<BaseModel>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<BaseModel> = match review.try_into() {
        Ok(req) => req,
        Err(e) => return Json(AdmissionResponse::invalid(e.to_string()).into_review()),
    };
    let resp = AdmissionResponse::from(&req);
    let Some(model) = &req.object else {
        return Json(resp.into_review());
    };
    let ns = model.namespace().or_else(|| req.namespace.clone());

    match validate_model_spec(&state, ns.as_deref(), &model.spec.model).await {
        Ok(warnings) => Json(with_warnings(resp, warnings).into_review()),
        Err(reason) => {
            warn!(model = %model.name_any(), %reason, "denied base model");
            Json(resp.deny(reason).into_review())
        }
    }
}

pub async fn validate_cluster_base_model(
    State(state): State<WebhookState>,
    Json(review): Json<AdmissionReview<ClusterBaseModel>>,
) -> Json<AdmissionReview<DynamicObject>> {
    let req: AdmissionRequest<ClusterBaseModel> = match review.try_into() {
        Ok(req) => req,
        Err(e) => return Json(AdmissionResponse::invalid(e.to_string()).into_review()),
    };
    let resp = AdmissionResponse::from(&req);
    let Some(model) = &req.object else {
        return Json(resp.into_review());
    };

    match validate_model_spec(&state, None, &model.spec.model).await {
        Ok(warnings) => Json(with_warnings(resp, warnings).into_review()),
        Err(reason) => {
            warn!(model = %model.name_any(), %reason, "denied cluster base model");
            Json(resp.deny(reason).into_review())
        }
    }
}
