//! Label-scoped, owner-ref-gated deletion of children whose component role is
//! no longer declared on the InferenceService.

use std::collections::BTreeSet;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, warn};

use crate::consts::{COMPONENT_LABEL, EXTERNAL_SERVICE_COMPONENT, INFERENCE_SERVICE_LABEL};
use crate::crd::InferenceService;
use crate::discovery::DiscoveryCache;
use crate::error::Result;

/// Everything the orphan decision needs, extracted from the parent once.
pub struct OrphanScope<'a> {
    pub isvc_name: &'a str,
    pub isvc_uid: &'a str,
    pub api_version: String,
    /// Component label values still declared on the spec.
    pub active: BTreeSet<String>,
    pub ingress_disabled: bool,
    pub has_traffic_component: bool,
}

impl<'a> OrphanScope<'a> {
    pub fn for_isvc(isvc: &'a InferenceService, active: BTreeSet<String>) -> Option<Self> {
        Some(Self {
            isvc_name: isvc.metadata.name.as_deref()?,
            isvc_uid: isvc.metadata.uid.as_deref()?,
            api_version: crate::consts::api_version(),
            active,
            ingress_disabled: isvc.ingress_disabled(),
            has_traffic_component: isvc.has_traffic_component(),
        })
    }

    fn owned_by_us(&self, refs: &[OwnerReference]) -> bool {
        refs.iter().any(|r| {
            r.kind == "InferenceService"
                && r.api_version == self.api_version
                && r.name == self.isvc_name
                && r.uid == self.isvc_uid
        })
    }
}

/// The pure orphan rule. Skips objects not owned by this exact parent (uid
/// included), objects without a component label, active components, and the
/// external Service while it is still needed.
pub fn is_orphan(
    scope: &OrphanScope<'_>,
    kind: &str,
    component_label: Option<&str>,
    owner_refs: &[OwnerReference],
) -> bool {
    if !scope.owned_by_us(owner_refs) {
        return false;
    }
    let Some(component) = component_label.filter(|c| !c.is_empty()) else {
        return false;
    };
    if scope.active.contains(component) {
        return false;
    }
    if component == EXTERNAL_SERVICE_COMPONENT
        && kind == "Service"
        && scope.ingress_disabled
        && scope.has_traffic_component
    {
        return false;
    }
    true
}

fn is_no_match(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

async fn cleanup_kind(
    client: &Client,
    gvk: &GroupVersionKind,
    namespace: &str,
    scope: &OrphanScope<'_>,
) -> Result<()> {
    let ar = ApiResource::from_gvk(gvk);
    let api: Api<DynamicObject> = Api::namespaced_with(client.clone(), namespace, &ar);
    let lp =
        ListParams::default().labels(&format!("{INFERENCE_SERVICE_LABEL}={}", scope.isvc_name));
    let list = match api.list(&lp).await {
        Ok(list) => list,
        // The optional CRD vanished between discovery and list.
        Err(e) if is_no_match(&e) => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    for obj in list {
        let name = obj.name_any();
        let component = obj.labels().get(COMPONENT_LABEL).map(String::as_str);
        let owner_refs = obj.owner_references();
        if !is_orphan(scope, &gvk.kind, component, owner_refs) {
            continue;
        }
        debug!(kind = %gvk.kind, %name, component = ?component, "deleting orphaned child");
        match api.delete(&name, &Default::default()).await {
            Ok(_) => {}
            Err(kube::Error::Api(ae)) if ae.code == 404 => {}
            Err(e) => warn!(kind = %gvk.kind, %name, error = %e, "failed to delete orphan"),
        }
    }
    Ok(())
}

/// Sweep the static candidate kinds: core kinds plus whichever optional kinds
/// the discovery cache reports available. Per-kind failures are logged and do
/// not abort the sweep.
pub async fn cleanup_orphans(
    client: &Client,
    cache: &DiscoveryCache,
    isvc: &InferenceService,
    active: BTreeSet<String>,
) -> Result<()> {
    let Some(scope) = OrphanScope::for_isvc(isvc, active) else {
        return Ok(());
    };
    let namespace = isvc.namespace().unwrap_or_default();
    for gvk in cache.available_core_and_optional_kinds(client).await? {
        if let Err(e) = cleanup_kind(client, &gvk, &namespace, &scope).await {
            warn!(kind = %gvk.kind, error = %e, "orphan sweep failed for kind");
        }
    }
    Ok(())
}

/// Discovery-driven variant: walk every namespaced, listable kind the API
/// server advertises. Per-group discovery failures are logged and skipped.
pub async fn cleanup_orphans_dynamic(
    client: &Client,
    isvc: &InferenceService,
    active: BTreeSet<String>,
) -> Result<()> {
    let Some(scope) = OrphanScope::for_isvc(isvc, active) else {
        return Ok(());
    };
    let namespace = isvc.namespace().unwrap_or_default();

    let mut group_versions: Vec<String> = Vec::new();
    match client.list_core_api_versions().await {
        Ok(core) => group_versions.extend(core.versions),
        Err(e) => warn!(error = %e, "core api discovery failed"),
    }
    match client.list_api_groups().await {
        Ok(groups) => {
            for g in groups.groups {
                if let Some(pref) = g.preferred_version {
                    group_versions.push(pref.group_version);
                }
            }
        }
        Err(e) => warn!(error = %e, "api group discovery failed"),
    }

    for gv in group_versions {
        let resources = match client.list_api_group_resources(&gv).await {
            Ok(r) => r,
            Err(e) => {
                warn!(group_version = %gv, error = %e, "group discovery failed; skipping");
                continue;
            }
        };
        let (group, version) = match gv.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), gv.clone()),
        };
        for res in resources.resources {
            if !res.namespaced || !res.verbs.iter().any(|v| v == "list") {
                continue;
            }
            // Subresources like pods/log show up with a slash.
            if res.name.contains('/') {
                continue;
            }
            let gvk = GroupVersionKind::gvk(&group, &version, &res.kind);
            if let Err(e) = cleanup_kind(client, &gvk, &namespace, &scope).await {
                warn!(kind = %res.kind, error = %e, "orphan sweep failed for kind");
            }
        }
    }
    Ok(())
}
