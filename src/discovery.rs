//! Process-wide cache of which kinds each group/version actually serves.
//!
//! Discovery is queried at most once per group/version; a NotFound answer is
//! cached as "no kinds" so optional CRDs that are absent never trigger
//! repeated round-trips.

use std::collections::{HashMap, HashSet};

use kube::Client;
use kube::api::GroupVersionKind;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::Result;

/// Kinds assumed present on every conformant cluster.
pub fn core_kinds() -> Vec<GroupVersionKind> {
    vec![
        GroupVersionKind::gvk("apps", "v1", "Deployment"),
        GroupVersionKind::gvk("", "v1", "Service"),
        GroupVersionKind::gvk("autoscaling", "v2", "HorizontalPodAutoscaler"),
        GroupVersionKind::gvk("networking.k8s.io", "v1", "Ingress"),
        GroupVersionKind::gvk("", "v1", "ConfigMap"),
        GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "Role"),
        GroupVersionKind::gvk("rbac.authorization.k8s.io", "v1", "RoleBinding"),
        GroupVersionKind::gvk("", "v1", "ServiceAccount"),
        GroupVersionKind::gvk("", "v1", "PersistentVolumeClaim"),
    ]
}

/// Optional kinds probed through the cache before use.
pub fn optional_kinds() -> Vec<GroupVersionKind> {
    vec![
        ray_cluster_gvk(),
        knative_service_gvk(),
        leader_worker_set_gvk(),
        scaled_object_gvk(),
        virtual_service_gvk(),
    ]
}

pub fn ray_cluster_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("ray.io", "v1", "RayCluster")
}

pub fn knative_service_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("serving.knative.dev", "v1", "Service")
}

pub fn leader_worker_set_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("leaderworkerset.x-k8s.io", "v1", "LeaderWorkerSet")
}

pub fn scaled_object_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("keda.sh", "v1alpha1", "ScaledObject")
}

pub fn virtual_service_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("networking.istio.io", "v1beta1", "VirtualService")
}

fn group_version(gvk: &GroupVersionKind) -> String {
    if gvk.group.is_empty() {
        gvk.version.clone()
    } else {
        format!("{}/{}", gvk.group, gvk.version)
    }
}

/// Lock-guarded map of group/version to the set of served kinds. The lock is
/// held across the discovery call so concurrent readers of the same
/// group/version wait for the first answer instead of racing duplicates.
#[derive(Default)]
pub struct DiscoveryCache {
    entries: Mutex<HashMap<String, HashSet<String>>>,
}

impl DiscoveryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache pre-populated with entries; tests inject availability here.
    pub fn seeded<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (String, HashSet<String>)>,
    {
        Self {
            entries: Mutex::new(entries.into_iter().collect()),
        }
    }

    /// Answer from the cache only; `None` means this group/version has not
    /// been probed yet.
    pub fn peek(&self, gvk: &GroupVersionKind) -> Option<bool> {
        let entries = self.entries.try_lock().ok()?;
        entries
            .get(&group_version(gvk))
            .map(|kinds| kinds.contains(&gvk.kind))
    }

    pub async fn is_available(&self, client: &Client, gvk: &GroupVersionKind) -> Result<bool> {
        let gv = group_version(gvk);
        let mut entries = self.entries.lock().await;
        if let Some(kinds) = entries.get(&gv) {
            return Ok(kinds.contains(&gvk.kind));
        }
        match client.list_api_group_resources(&gv).await {
            Ok(list) => {
                let kinds: HashSet<String> = list.resources.into_iter().map(|r| r.kind).collect();
                let available = kinds.contains(&gvk.kind);
                debug!(%gv, ?kinds, "cached discovery result");
                entries.insert(gv, kinds);
                Ok(available)
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(%gv, "group/version not served; cached as absent");
                entries.insert(gv, HashSet::new());
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// All core kinds plus every optional kind the cluster serves.
    pub async fn available_core_and_optional_kinds(
        &self,
        client: &Client,
    ) -> Result<Vec<GroupVersionKind>> {
        let mut out = core_kinds();
        for gvk in optional_kinds() {
            if self.is_available(client, &gvk).await? {
                out.push(gvk);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_cache() -> DiscoveryCache {
        DiscoveryCache::seeded([
            (
                "serving.knative.dev/v1".to_string(),
                HashSet::from(["Service".to_string(), "Configuration".to_string()]),
            ),
            ("ray.io/v1".to_string(), HashSet::new()),
        ])
    }

    #[test]
    fn seeded_entries_answer_without_a_client() {
        let cache = seeded_cache();
        assert_eq!(cache.peek(&knative_service_gvk()), Some(true));
        assert_eq!(cache.peek(&ray_cluster_gvk()), Some(false));
    }

    #[test]
    fn unprobed_group_versions_are_unknown() {
        let cache = seeded_cache();
        assert_eq!(cache.peek(&leader_worker_set_gvk()), None);
    }

    #[test]
    fn empty_kind_set_means_absent_not_unknown() {
        // A 404 from discovery is cached as an empty set; further probes of
        // any kind in that group/version answer "absent" from the cache.
        let cache = DiscoveryCache::seeded([("keda.sh/v1alpha1".to_string(), HashSet::new())]);
        assert_eq!(cache.peek(&scaled_object_gvk()), Some(false));
    }

    #[test]
    fn core_kinds_include_workload_and_rbac_surface() {
        let kinds: Vec<String> = core_kinds().into_iter().map(|g| g.kind).collect();
        for expected in [
            "Deployment",
            "Service",
            "HorizontalPodAutoscaler",
            "Ingress",
            "ConfigMap",
            "Role",
            "RoleBinding",
            "ServiceAccount",
            "PersistentVolumeClaim",
        ] {
            assert!(kinds.iter().any(|k| k == expected), "missing {expected}");
        }
    }
}
