//! Per-component deployment-mode derivation and the single ingress mode.

use crate::crd::{ComponentSpec, DeploymentMode, InferenceService, RuntimeSpec};

/// Mode requested outside any single component: the object annotation wins,
/// then the runtime's explicit mode.
pub fn requested_mode(isvc: &InferenceService, runtime: Option<&RuntimeSpec>) -> Option<DeploymentMode> {
    isvc.requested_mode().or_else(|| {
        runtime
            .and_then(|r| r.deployment_mode.as_deref())
            .and_then(DeploymentMode::parse)
    })
}

/// A leader or worker sub-spec forces MultiNode regardless of the requested
/// mode; otherwise the requested mode applies, defaulting to RawDeployment.
pub fn derive_component_mode(
    component: Option<&ComponentSpec>,
    requested: Option<DeploymentMode>,
) -> DeploymentMode {
    if component.is_some_and(|c| c.leader.is_some() || c.worker.is_some()) {
        return DeploymentMode::MultiNode;
    }
    requested.unwrap_or(DeploymentMode::RawDeployment)
}

/// One ingress mode per object: router's if a router exists, else decoder's,
/// else engine's.
pub fn ingress_mode(
    engine: Option<DeploymentMode>,
    decoder: Option<DeploymentMode>,
    router: Option<DeploymentMode>,
) -> DeploymentMode {
    router
        .or(decoder)
        .or(engine)
        .unwrap_or(DeploymentMode::RawDeployment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{LeaderSpec, WorkerSpec};

    #[test]
    fn leader_or_worker_forces_multi_node() {
        let with_leader = ComponentSpec {
            leader: Some(LeaderSpec::default()),
            ..Default::default()
        };
        let with_worker = ComponentSpec {
            worker: Some(WorkerSpec {
                size: Some(2),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            derive_component_mode(Some(&with_leader), Some(DeploymentMode::Serverless)),
            DeploymentMode::MultiNode
        );
        assert_eq!(
            derive_component_mode(Some(&with_worker), None),
            DeploymentMode::MultiNode
        );
    }

    #[test]
    fn requested_mode_applies_without_sub_specs() {
        let plain = ComponentSpec::default();
        assert_eq!(
            derive_component_mode(Some(&plain), Some(DeploymentMode::Serverless)),
            DeploymentMode::Serverless
        );
        assert_eq!(
            derive_component_mode(Some(&plain), None),
            DeploymentMode::RawDeployment
        );
        assert_eq!(
            derive_component_mode(None, None),
            DeploymentMode::RawDeployment
        );
    }

    #[test]
    fn ingress_mode_prefers_router_then_decoder_then_engine() {
        assert_eq!(
            ingress_mode(
                Some(DeploymentMode::RawDeployment),
                Some(DeploymentMode::MultiNode),
                Some(DeploymentMode::Serverless),
            ),
            DeploymentMode::Serverless
        );
        assert_eq!(
            ingress_mode(
                Some(DeploymentMode::RawDeployment),
                Some(DeploymentMode::MultiNode),
                None,
            ),
            DeploymentMode::MultiNode
        );
        assert_eq!(
            ingress_mode(Some(DeploymentMode::RawDeployment), None, None),
            DeploymentMode::RawDeployment
        );
    }
}
