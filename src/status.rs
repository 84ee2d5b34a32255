//! Status propagation: per-component condition records, aggregate conditions,
//! and the top-level Ready verdict.

use std::collections::BTreeMap;

use crate::components::ComponentReadiness;
use crate::consts::{COND_DEPLOYMENT_READY, COND_READY, COND_ROUTES_READY};
use crate::crd::{ComponentKind, ComponentStatusSpec, Condition, InferenceServiceStatus};
use crate::resources::upsert_condition;

/// What one reconcile observed about one component, in componentList order.
#[derive(Debug, Clone)]
pub struct ComponentObservation {
    pub kind: ComponentKind,
    pub url: Option<String>,
    pub readiness: ComponentReadiness,
}

fn condition_status(v: Option<bool>) -> &'static str {
    match v {
        Some(true) => "True",
        Some(false) => "False",
        None => "Unknown",
    }
}

/// The componentList: Engine always; Decoder/Router when their merged spec
/// exists and their mode is not Serverless.
pub fn component_list(
    decoder_present_non_serverless: bool,
    router_present_non_serverless: bool,
) -> Vec<ComponentKind> {
    let mut list = vec![ComponentKind::Engine];
    if decoder_present_non_serverless {
        list.push(ComponentKind::Decoder);
    }
    if router_present_non_serverless {
        list.push(ComponentKind::Router);
    }
    list
}

/// Aggregate one condition type across the observed components:
/// False (with the first False's reason) beats Unknown beats True.
pub fn aggregate_condition(observations: &[ComponentObservation], type_: &str) -> Condition {
    let value_of = |r: &ComponentReadiness| match type_ {
        COND_ROUTES_READY => r.routes_ready,
        COND_DEPLOYMENT_READY => r.deployment_ready,
        _ => None,
    };

    for obs in observations {
        if value_of(&obs.readiness) == Some(false) {
            return Condition {
                type_: type_.into(),
                status: "False".into(),
                reason: Some(format!("{}NotReady", obs.kind)),
                message: Some(format!("component {} reports {type_}=False", obs.kind)),
                last_transition_time: None,
            };
        }
    }
    if let Some(obs) = observations.iter().find(|o| value_of(&o.readiness).is_none()) {
        return Condition {
            type_: type_.into(),
            status: "Unknown".into(),
            reason: Some(format!("{}Pending", obs.kind)),
            message: Some(format!("component {} has not reported {type_}", obs.kind)),
            last_transition_time: None,
        };
    }
    Condition {
        type_: type_.into(),
        status: "True".into(),
        reason: None,
        message: None,
        last_transition_time: None,
    }
}

fn per_component_conditions(
    old: Option<&ComponentStatusSpec>,
    obs: &ComponentObservation,
    now: &str,
) -> Vec<Condition> {
    let mut conds = old.and_then(|o| o.conditions.clone()).unwrap_or_default();
    for (type_, value) in [
        (COND_ROUTES_READY, obs.readiness.routes_ready),
        (COND_DEPLOYMENT_READY, obs.readiness.deployment_ready),
    ] {
        upsert_condition(
            &mut conds,
            Condition {
                type_: type_.into(),
                status: condition_status(value).into(),
                reason: None,
                message: None,
                last_transition_time: Some(now.to_string()),
            },
        );
    }
    conds
}

/// Build the desired status from this reconcile's observations. Entries whose
/// component is no longer observed are dropped; condition transition times
/// are carried over when a status value did not change.
pub fn build_status(
    old: &InferenceServiceStatus,
    observations: &[ComponentObservation],
    url: Option<String>,
    runtime_name: Option<String>,
    model_format: Option<String>,
    now: &str,
) -> InferenceServiceStatus {
    let old_components = old.components.clone().unwrap_or_default();
    let mut components: BTreeMap<ComponentKind, ComponentStatusSpec> = BTreeMap::new();
    for obs in observations {
        components.insert(
            obs.kind,
            ComponentStatusSpec {
                url: obs.url.clone(),
                conditions: Some(per_component_conditions(
                    old_components.get(&obs.kind),
                    obs,
                    now,
                )),
            },
        );
    }

    let routes = aggregate_condition(observations, COND_ROUTES_READY);
    let deploys = aggregate_condition(observations, COND_DEPLOYMENT_READY);
    let ready = routes.status == "True" && deploys.status == "True";

    let mut conditions = old.conditions.clone().unwrap_or_default();
    for mut cond in [routes, deploys] {
        cond.last_transition_time = Some(now.to_string());
        upsert_condition(&mut conditions, cond);
    }
    upsert_condition(
        &mut conditions,
        Condition {
            type_: COND_READY.into(),
            status: if ready { "True" } else { "False" }.into(),
            reason: None,
            message: None,
            last_transition_time: Some(now.to_string()),
        },
    );

    InferenceServiceStatus {
        url: url.clone().or_else(|| old.url.clone()),
        address: url
            .map(|u| crate::crd::Addressable { url: Some(u) })
            .or_else(|| old.address.clone()),
        conditions: Some(conditions),
        components: Some(components),
        runtime_name: runtime_name.or_else(|| old.runtime_name.clone()),
        model_format: model_format.or_else(|| old.model_format.clone()),
    }
}

pub fn is_ready(status: &InferenceServiceStatus) -> Option<bool> {
    let cond = status
        .conditions
        .as_ref()?
        .iter()
        .find(|c| c.type_ == COND_READY)?;
    match cond.status.as_str() {
        "True" => Some(true),
        "False" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(kind: ComponentKind, routes: Option<bool>, deploys: Option<bool>) -> ComponentObservation {
        ComponentObservation {
            kind,
            url: None,
            readiness: ComponentReadiness {
                routes_ready: routes,
                deployment_ready: deploys,
            },
        }
    }

    #[test]
    fn all_true_aggregates_true() {
        let observations = vec![
            obs(ComponentKind::Engine, Some(true), Some(true)),
            obs(ComponentKind::Decoder, Some(true), Some(true)),
        ];
        assert_eq!(
            aggregate_condition(&observations, COND_ROUTES_READY).status,
            "True"
        );
        assert_eq!(
            aggregate_condition(&observations, COND_DEPLOYMENT_READY).status,
            "True"
        );
    }

    #[test]
    fn first_false_wins_with_its_reason() {
        let observations = vec![
            obs(ComponentKind::Engine, Some(true), Some(false)),
            obs(ComponentKind::Decoder, Some(true), None),
        ];
        let agg = aggregate_condition(&observations, COND_DEPLOYMENT_READY);
        assert_eq!(agg.status, "False");
        assert_eq!(agg.reason.as_deref(), Some("engineNotReady"));
    }

    #[test]
    fn missing_condition_aggregates_unknown() {
        let observations = vec![
            obs(ComponentKind::Engine, Some(true), Some(true)),
            obs(ComponentKind::Decoder, None, Some(true)),
        ];
        assert_eq!(
            aggregate_condition(&observations, COND_ROUTES_READY).status,
            "Unknown"
        );
    }

    #[test]
    fn ready_iff_both_aggregates_true() {
        let both = vec![obs(ComponentKind::Engine, Some(true), Some(true))];
        let status = build_status(
            &InferenceServiceStatus::default(),
            &both,
            None,
            None,
            None,
            "2026-01-01T00:00:00Z",
        );
        assert_eq!(is_ready(&status), Some(true));

        let half = vec![obs(ComponentKind::Engine, Some(true), Some(false))];
        let status = build_status(
            &InferenceServiceStatus::default(),
            &half,
            None,
            None,
            None,
            "2026-01-01T00:00:00Z",
        );
        assert_eq!(is_ready(&status), Some(false));
    }

    #[test]
    fn stale_component_entries_are_dropped() {
        let old = build_status(
            &InferenceServiceStatus::default(),
            &[
                obs(ComponentKind::Engine, Some(true), Some(true)),
                obs(ComponentKind::Decoder, Some(true), Some(true)),
            ],
            None,
            None,
            None,
            "2026-01-01T00:00:00Z",
        );
        let new = build_status(
            &old,
            &[obs(ComponentKind::Engine, Some(true), Some(true))],
            None,
            None,
            None,
            "2026-01-02T00:00:00Z",
        );
        let components = new.components.unwrap();
        assert!(components.contains_key(&ComponentKind::Engine));
        assert!(!components.contains_key(&ComponentKind::Decoder));
    }

    #[test]
    fn unchanged_statuses_keep_their_transition_time() {
        let first = build_status(
            &InferenceServiceStatus::default(),
            &[obs(ComponentKind::Engine, Some(true), Some(true))],
            None,
            None,
            None,
            "2026-01-01T00:00:00Z",
        );
        let second = build_status(
            &first,
            &[obs(ComponentKind::Engine, Some(true), Some(true))],
            None,
            None,
            None,
            "2026-01-09T09:09:09Z",
        );
        let ready = second
            .conditions
            .as_ref()
            .unwrap()
            .iter()
            .find(|c| c.type_ == COND_READY)
            .unwrap();
        assert_eq!(
            ready.last_transition_time.as_deref(),
            Some("2026-01-01T00:00:00Z")
        );
        // Identical observations at a later time produce an identical status.
        assert_eq!(first, second);
    }

    #[test]
    fn component_list_always_contains_engine() {
        assert_eq!(component_list(false, false), vec![ComponentKind::Engine]);
        assert_eq!(
            component_list(true, true),
            vec![
                ComponentKind::Engine,
                ComponentKind::Decoder,
                ComponentKind::Router
            ]
        );
    }

    #[test]
    fn url_falls_back_to_previous_status() {
        let with_url = build_status(
            &InferenceServiceStatus::default(),
            &[obs(ComponentKind::Engine, Some(true), Some(true))],
            Some("http://m1.models.svc.cluster.local".into()),
            None,
            None,
            "2026-01-01T00:00:00Z",
        );
        let kept = build_status(
            &with_url,
            &[obs(ComponentKind::Engine, Some(true), Some(true))],
            None,
            None,
            None,
            "2026-01-02T00:00:00Z",
        );
        assert_eq!(
            kept.url.as_deref(),
            Some("http://m1.models.svc.cluster.local")
        );
    }
}
