//! Composes a runtime's template pod specs with user component overrides.
//!
//! Merging is union-with-user-wins throughout: containers are keyed by name,
//! env vars by name, volumes by name, node selectors by key; scalar fields
//! take the user value when set and the template value otherwise.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{Container, EnvVar, Toleration, Volume};

use crate::crd::{ComponentSpec, LeaderSpec, PodFields, RuntimeSpec, WorkerSpec};

fn or_template<T: Clone>(user: &Option<T>, template: &Option<T>) -> Option<T> {
    user.clone().or_else(|| template.clone())
}

/// Field-by-field merge of a user container over a template container of the
/// same name.
pub fn merge_container(template: &Container, user: &Container) -> Container {
    Container {
        name: template.name.clone(),
        image: or_template(&user.image, &template.image),
        // args and command are replaced wholesale when the user sets any.
        args: or_template(&user.args, &template.args),
        command: or_template(&user.command, &template.command),
        env: merge_env(&template.env, &user.env),
        resources: or_template(&user.resources, &template.resources),
        ports: or_template(&user.ports, &template.ports),
        volume_mounts: or_template(&user.volume_mounts, &template.volume_mounts),
        lifecycle: or_template(&user.lifecycle, &template.lifecycle),
        liveness_probe: or_template(&user.liveness_probe, &template.liveness_probe),
        readiness_probe: or_template(&user.readiness_probe, &template.readiness_probe),
        startup_probe: or_template(&user.startup_probe, &template.startup_probe),
        env_from: or_template(&user.env_from, &template.env_from),
        image_pull_policy: or_template(&user.image_pull_policy, &template.image_pull_policy),
        security_context: or_template(&user.security_context, &template.security_context),
        working_dir: or_template(&user.working_dir, &template.working_dir),
        ..template.clone()
    }
}

/// Union of env lists keyed by variable name. Template order is preserved;
/// user-only variables are appended in their own order.
pub fn merge_env(
    template: &Option<Vec<EnvVar>>,
    user: &Option<Vec<EnvVar>>,
) -> Option<Vec<EnvVar>> {
    match (template, user) {
        (None, None) => None,
        (Some(t), None) => Some(t.clone()),
        (None, Some(u)) => Some(u.clone()),
        (Some(t), Some(u)) => {
            let mut out: Vec<EnvVar> = t
                .iter()
                .map(|tv| u.iter().find(|uv| uv.name == tv.name).unwrap_or(tv).clone())
                .collect();
            for uv in u {
                if !t.iter().any(|tv| tv.name == uv.name) {
                    out.push(uv.clone());
                }
            }
            Some(out)
        }
    }
}

/// Union of container lists keyed by container name; template order first,
/// user-only containers appended.
pub fn merge_containers(template: &[Container], user: &[Container]) -> Vec<Container> {
    let mut out: Vec<Container> = template
        .iter()
        .map(|tc| match user.iter().find(|uc| uc.name == tc.name) {
            Some(uc) => merge_container(tc, uc),
            None => tc.clone(),
        })
        .collect();
    for uc in user {
        if !template.iter().any(|tc| tc.name == uc.name) {
            out.push(uc.clone());
        }
    }
    out
}

fn merge_volumes(template: &Option<Vec<Volume>>, user: &Option<Vec<Volume>>) -> Option<Vec<Volume>> {
    match (template, user) {
        (None, None) => None,
        (Some(t), None) => Some(t.clone()),
        (None, Some(u)) => Some(u.clone()),
        (Some(t), Some(u)) => {
            let mut out: Vec<Volume> = t
                .iter()
                .map(|tv| u.iter().find(|uv| uv.name == tv.name).unwrap_or(tv).clone())
                .collect();
            for uv in u {
                if !t.iter().any(|tv| tv.name == uv.name) {
                    out.push(uv.clone());
                }
            }
            Some(out)
        }
    }
}

fn merge_node_selector(
    template: &Option<BTreeMap<String, String>>,
    user: &Option<BTreeMap<String, String>>,
) -> Option<BTreeMap<String, String>> {
    match (template, user) {
        (None, None) => None,
        (Some(t), None) => Some(t.clone()),
        (None, Some(u)) => Some(u.clone()),
        (Some(t), Some(u)) => {
            let mut out = t.clone();
            out.extend(u.clone());
            Some(out)
        }
    }
}

fn merge_tolerations(
    template: &Option<Vec<Toleration>>,
    user: &Option<Vec<Toleration>>,
) -> Option<Vec<Toleration>> {
    match (template, user) {
        (None, None) => None,
        (Some(t), None) => Some(t.clone()),
        (None, Some(u)) => Some(u.clone()),
        (Some(t), Some(u)) => {
            let mut out = t.clone();
            for uv in u {
                if !out.contains(uv) {
                    out.push(uv.clone());
                }
            }
            Some(out)
        }
    }
}

pub fn merge_pod_fields(template: &PodFields, user: &PodFields) -> PodFields {
    PodFields {
        containers: merge_containers(&template.containers, &user.containers),
        volumes: merge_volumes(&template.volumes, &user.volumes),
        service_account_name: or_template(&user.service_account_name, &template.service_account_name),
        node_selector: merge_node_selector(&template.node_selector, &user.node_selector),
        tolerations: merge_tolerations(&template.tolerations, &user.tolerations),
        affinity: or_template(&user.affinity, &template.affinity),
    }
}

/// Merge one user component over the runtime template. Leader and worker
/// sub-specs merge independently against the runtime's leader/worker pod
/// specs, falling back to the main template when the runtime has none. A
/// user leader without a user worker inherits the runtime's worker wholesale
/// so a multi-node runtime stays coherent.
pub fn merge_component_spec(runtime: &RuntimeSpec, user: &ComponentSpec) -> ComponentSpec {
    let leader = user.leader.as_ref().map(|ul| {
        let template = runtime
            .leader_pod_spec
            .as_ref()
            .map(|l| &l.pod)
            .unwrap_or(&runtime.pod);
        LeaderSpec {
            pod: merge_pod_fields(template, &ul.pod),
        }
    });

    let worker = match (&user.worker, &runtime.worker_pod_spec) {
        (Some(uw), rt_worker) => {
            let template = rt_worker.as_ref().map(|w| &w.pod).unwrap_or(&runtime.pod);
            Some(WorkerSpec {
                pod: merge_pod_fields(template, &uw.pod),
                size: uw.size.or_else(|| rt_worker.as_ref().and_then(|w| w.size)),
            })
        }
        (None, Some(rt_worker)) if user.leader.is_some() => Some(WorkerSpec {
            pod: rt_worker.pod.clone(),
            size: rt_worker.size,
        }),
        _ => None,
    };

    ComponentSpec {
        pod: merge_pod_fields(&runtime.pod, &user.pod),
        min_replicas: user.min_replicas,
        max_replicas: user.max_replicas,
        leader,
        worker,
    }
}

/// The three merged component specs; any may remain absent.
#[derive(Debug, Default, Clone)]
pub struct MergedSpecs {
    pub engine: Option<ComponentSpec>,
    pub decoder: Option<ComponentSpec>,
    pub router: Option<ComponentSpec>,
}

pub fn merge_specs(
    runtime: Option<&RuntimeSpec>,
    engine: Option<&ComponentSpec>,
    decoder: Option<&ComponentSpec>,
    router: Option<&ComponentSpec>,
) -> MergedSpecs {
    let empty = RuntimeSpec::default();
    let runtime = runtime.unwrap_or(&empty);
    MergedSpecs {
        engine: engine.map(|c| merge_component_spec(runtime, c)),
        decoder: decoder.map(|c| merge_component_spec(runtime, c)),
        router: router.map(|c| merge_component_spec(runtime, c)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container(name: &str, image: Option<&str>) -> Container {
        Container {
            name: name.into(),
            image: image.map(Into::into),
            ..Default::default()
        }
    }

    fn env(name: &str, value: &str) -> EnvVar {
        EnvVar {
            name: name.into(),
            value: Some(value.into()),
            ..Default::default()
        }
    }

    #[test]
    fn user_image_overrides_template() {
        let t = container("engine", Some("vllm:v0.8"));
        let u = container("engine", Some("engine:latest"));
        assert_eq!(merge_container(&t, &u).image.as_deref(), Some("engine:latest"));
    }

    #[test]
    fn template_image_survives_when_user_is_silent() {
        let t = container("engine", Some("vllm:v0.8"));
        let u = container("engine", None);
        assert_eq!(merge_container(&t, &u).image.as_deref(), Some("vllm:v0.8"));
    }

    #[test]
    fn user_args_replace_template_args_wholesale() {
        let mut t = container("engine", None);
        t.args = Some(vec!["--port=8080".into(), "--model=/models".into()]);
        let mut u = container("engine", None);
        u.args = Some(vec!["--tensor-parallel=2".into()]);
        let merged = merge_container(&t, &u);
        assert_eq!(merged.args, Some(vec!["--tensor-parallel=2".to_string()]));
    }

    #[test]
    fn env_union_is_keyed_by_name_with_user_winning() {
        let t = Some(vec![env("LOG_LEVEL", "info"), env("MODEL_DIR", "/models")]);
        let u = Some(vec![env("LOG_LEVEL", "debug"), env("EXTRA", "1")]);
        let merged = merge_env(&t, &u).unwrap();
        let get = |n: &str| {
            merged
                .iter()
                .find(|e| e.name == n)
                .and_then(|e| e.value.clone())
        };
        assert_eq!(get("LOG_LEVEL").as_deref(), Some("debug"));
        assert_eq!(get("MODEL_DIR").as_deref(), Some("/models"));
        assert_eq!(get("EXTRA").as_deref(), Some("1"));
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn user_only_containers_are_appended() {
        let merged = merge_containers(
            &[container("engine", Some("vllm:v0.8"))],
            &[container("sidecar", Some("proxy:1"))],
        );
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].name, "engine");
        assert_eq!(merged[1].name, "sidecar");
    }

    #[test]
    fn node_selector_union_user_wins_on_collision() {
        let t = Some(BTreeMap::from([
            ("gpu".to_string(), "a100".to_string()),
            ("zone".to_string(), "us-east".to_string()),
        ]));
        let u = Some(BTreeMap::from([("gpu".to_string(), "h100".to_string())]));
        let merged = merge_node_selector(&t, &u).unwrap();
        assert_eq!(merged.get("gpu").map(String::as_str), Some("h100"));
        assert_eq!(merged.get("zone").map(String::as_str), Some("us-east"));
    }

    #[test]
    fn leader_without_user_worker_inherits_runtime_worker() {
        let runtime = RuntimeSpec {
            pod: PodFields {
                containers: vec![container("engine", Some("vllm:v0.8"))],
                ..Default::default()
            },
            worker_pod_spec: Some(crate::crd::WorkerPodSpec {
                size: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        let user = ComponentSpec {
            leader: Some(LeaderSpec::default()),
            ..Default::default()
        };
        let merged = merge_component_spec(&runtime, &user);
        assert!(merged.leader.is_some());
        assert_eq!(merged.worker.as_ref().and_then(|w| w.size), Some(2));
    }

    #[test]
    fn absent_user_components_stay_absent() {
        let merged = merge_specs(None, Some(&ComponentSpec::default()), None, None);
        assert!(merged.engine.is_some());
        assert!(merged.decoder.is_none());
        assert!(merged.router.is_none());
    }
}
