use std::{collections::BTreeSet, sync::Arc, time::Duration};

use chrono::{SecondsFormat, Utc};
use futures_util::StreamExt;
use kube::{
    Api, Client, Resource, ResourceExt,
    api::{Patch, PatchParams},
    runtime::{
        controller::{Action, Controller},
        events::{Event, EventType, Recorder, Reporter},
        watcher::Config,
    },
};
use tracing::{error, info, warn};

use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::Service,
    networking::v1::Ingress,
};

use crate::{
    components::{self, ComponentOutcome},
    consts::{
        DEPRECATION_WARNING_ANNOTATION, EVT_DEPLOYMENT_MODE_ERROR, EVT_MERGE_SPECS_ERROR,
        EVT_MODEL_RECONCILE_ERROR, EVT_NOT_READY, EVT_READY, EVT_RUNTIME_VALIDATION_ERROR,
        EVT_SERVERLESS_MODE_REJECTED, FINALIZER, MANAGER,
    },
    crd::{
        BaseModel, ClusterBaseModel, ComponentKind, ComponentStatusSpec, Condition, DeploymentMode,
        InferenceService, ModelRef, ModelSpec,
    },
    discovery::{DiscoveryCache, knative_service_gvk, leader_worker_set_gvk},
    error::{Error, Result},
    external_service, merge, migration, modes,
    resources::workload_name,
    runtimes,
    status::{self, ComponentObservation},
};

pub struct Ctx {
    pub client: Client,
    pub discovery: Arc<DiscoveryCache>,
    pub recorder: Recorder,
}

pub async fn run_operator(client: Client) -> anyhow::Result<()> {
    let root: Api<InferenceService> = Api::all(client.clone());

    let deploys: Api<Deployment> = Api::all(client.clone());
    let svcs: Api<Service> = Api::all(client.clone());
    let ings: Api<Ingress> = Api::all(client.clone());

    let reporter = Reporter {
        controller: MANAGER.into(),
        instance: std::env::var("HOSTNAME").ok(),
    };
    let ctx = Arc::new(Ctx {
        client: client.clone(),
        discovery: Arc::new(DiscoveryCache::new()),
        recorder: Recorder::new(client, reporter),
    });

    Controller::new(root, Config::default())
        .owns(deploys, Config::default())
        .owns(svcs, Config::default())
        .owns(ings, Config::default())
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((objref, _action)) => info!("✅ reconciled {}", objref.name),
                Err(e) => error!("❌ reconcile failed: {e:?}"),
            }
        })
        .await;

    Ok(())
}

fn error_policy(_obj: Arc<InferenceService>, err: &Error, _ctx: Arc<Ctx>) -> Action {
    if err.is_terminal() {
        error!("terminal reconcile error, waiting for spec change: {err}");
        return Action::await_change();
    }
    error!("reconcile error: {err:?}");
    Action::requeue(Duration::from_secs(10))
}

async fn publish(ctx: &Ctx, isvc: &InferenceService, type_: EventType, reason: &str, note: String) {
    let ev = Event {
        type_,
        reason: reason.into(),
        note: Some(note),
        action: "Reconcile".into(),
        secondary: None,
    };
    if let Err(e) = ctx.recorder.publish(&ev, &isvc.object_ref(&())).await {
        warn!(error = %e, "failed to publish event");
    }
}

async fn set_finalizers(
    api: &Api<InferenceService>,
    name: &str,
    finalizers: Vec<String>,
) -> Result<()> {
    let patch = serde_json::json!({ "metadata": { "finalizers": finalizers }});
    api.patch(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

async fn reconcile(isvc: Arc<InferenceService>, ctx: Arc<Ctx>) -> Result<Action> {
    let ns = isvc.namespace().unwrap_or_else(|| "default".into());
    let name = isvc.name_any();
    let api: Api<InferenceService> = Api::namespaced(ctx.client.clone(), &ns);

    // Finalizer lifecycle. No external state needs teardown, so removal is
    // the only action on deleted objects.
    if isvc.meta().deletion_timestamp.is_some() {
        if isvc.finalizers().iter().any(|f| f == FINALIZER) {
            let rest: Vec<String> = isvc
                .finalizers()
                .iter()
                .filter(|f| *f != FINALIZER)
                .cloned()
                .collect();
            set_finalizers(&api, &name, rest).await?;
        }
        return Ok(Action::await_change());
    }
    if !isvc.finalizers().iter().any(|f| f == FINALIZER) {
        let mut all: Vec<String> = isvc.finalizers().to_vec();
        all.push(FINALIZER.into());
        set_finalizers(&api, &name, all).await?;
        return Ok(Action::await_change());
    }

    // Virtual deployments get a synthetic URL and no cluster children.
    if isvc.requested_mode() == Some(DeploymentMode::VirtualDeployment) {
        return reconcile_virtual(&api, &ctx, &isvc, &ns, &name).await;
    }

    // Legacy predictor migration; the spec update retriggers this reconcile.
    if migration::migrate(&ctx.client, &isvc).await? {
        return Ok(Action::await_change());
    }

    // Model resolution.
    let model = match &isvc.spec.model {
        Some(mref) => Some(resolve_model(&ctx, &isvc, &ns, mref).await?),
        None => None,
    };

    // Runtime resolution: validate when pinned, auto-select otherwise.
    let resolved = match (&isvc.spec.runtime, &model) {
        (Some(rt), Some((model_name, model_spec))) => {
            match runtimes::validate_runtime(&ctx.client, &rt.name, model_name, model_spec, &isvc)
                .await
            {
                Ok(r) => Some(r),
                Err(e) => {
                    publish(
                        &ctx,
                        &isvc,
                        EventType::Warning,
                        EVT_RUNTIME_VALIDATION_ERROR,
                        e.to_string(),
                    )
                    .await;
                    return Err(e);
                }
            }
        }
        (None, Some((model_name, model_spec))) => {
            match runtimes::select_runtime(&ctx.client, model_name, model_spec, &isvc).await {
                Ok(r) => Some(r),
                Err(e) => {
                    publish(
                        &ctx,
                        &isvc,
                        EventType::Warning,
                        EVT_RUNTIME_VALIDATION_ERROR,
                        e.to_string(),
                    )
                    .await;
                    return Err(e);
                }
            }
        }
        (_, None) => None,
    };
    if let Some(r) = &resolved {
        info!(
            isvc = %name,
            runtime = %r.name,
            cluster_scoped = r.cluster_scoped,
            format = %r.format.name,
            "resolved serving runtime"
        );
    }

    // Merge user component specs over the runtime template.
    let merged = merge::merge_specs(
        resolved.as_ref().map(|r| &r.spec),
        isvc.spec.engine.as_ref(),
        isvc.spec.decoder.as_ref(),
        isvc.spec.router.as_ref(),
    );
    if merged.engine.is_none() && model.is_some() {
        let err = Error::MergeSpecs("spec declares a model but no engine component".into());
        publish(
            &ctx,
            &isvc,
            EventType::Warning,
            EVT_MERGE_SPECS_ERROR,
            err.to_string(),
        )
        .await;
        return Err(err);
    }

    // Per-component deployment modes and the single ingress mode.
    let requested = modes::requested_mode(&isvc, resolved.as_ref().map(|r| &r.spec));
    let engine_mode = merged
        .engine
        .as_ref()
        .map(|c| modes::derive_component_mode(Some(c), requested));
    let decoder_mode = merged
        .decoder
        .as_ref()
        .map(|c| modes::derive_component_mode(Some(c), requested));
    let router_mode = merged
        .router
        .as_ref()
        .map(|c| modes::derive_component_mode(Some(c), requested));
    let all_modes = [engine_mode, decoder_mode, router_mode];

    if all_modes.iter().flatten().any(|m| *m == DeploymentMode::Serverless)
        && !ctx
            .discovery
            .is_available(&ctx.client, &knative_service_gvk())
            .await?
    {
        publish(
            &ctx,
            &isvc,
            EventType::Warning,
            EVT_SERVERLESS_MODE_REJECTED,
            "serverless mode requested but the Knative Serving CRD is not installed".into(),
        )
        .await;
        return Err(Error::ServerlessUnavailable);
    }
    if all_modes.iter().flatten().any(|m| *m == DeploymentMode::MultiNode)
        && !ctx
            .discovery
            .is_available(&ctx.client, &leader_worker_set_gvk())
            .await?
    {
        let err = Error::DeploymentMode(
            "multi-node mode requested but the LeaderWorkerSet CRD is not installed".into(),
        );
        publish(
            &ctx,
            &isvc,
            EventType::Warning,
            EVT_DEPLOYMENT_MODE_ERROR,
            err.to_string(),
        )
        .await;
        return Err(err);
    }
    let ingress_mode = modes::ingress_mode(engine_mode, decoder_mode, router_mode);

    // Orphan cleanup never aborts the reconcile.
    let mut active: BTreeSet<String> = BTreeSet::new();
    for (kind, spec) in [
        (ComponentKind::Engine, &merged.engine),
        (ComponentKind::Decoder, &merged.decoder),
        (ComponentKind::Router, &merged.router),
    ] {
        if spec.is_some() {
            active.insert(kind.label().to_string());
        }
    }
    let sweep = if std::env::var("ORPHAN_DYNAMIC_DISCOVERY").is_ok() {
        crate::orphans::cleanup_orphans_dynamic(&ctx.client, &isvc, active).await
    } else {
        crate::orphans::cleanup_orphans(&ctx.client, &ctx.discovery, &isvc, active).await
    };
    if let Err(e) = sweep {
        warn!(isvc = %name, error = %e, "orphan cleanup failed");
    }

    // Opaque per-component reconcilers, engine first. A requeue request
    // returns immediately without persisting partial state.
    let component_work = [
        (ComponentKind::Engine, &merged.engine, engine_mode),
        (ComponentKind::Decoder, &merged.decoder, decoder_mode),
        (ComponentKind::Router, &merged.router, router_mode),
    ];
    for (kind, spec, mode) in component_work {
        let (Some(spec), Some(mode)) = (spec, mode) else {
            continue;
        };
        match components::reconcile_component(&ctx.client, &isvc, kind, spec, mode).await? {
            ComponentOutcome::Applied => {}
            ComponentOutcome::Requeue(d) => return Ok(Action::requeue(d)),
        }
    }

    // Retire the legacy predictor workload once the new components are up.
    if isvc.annotation(DEPRECATION_WARNING_ANNOTATION).is_some() {
        match migration::cleanup_legacy_workloads(&ctx.client, &isvc).await {
            Ok(true) => {}
            Ok(false) => info!(isvc = %name, "legacy predictor retirement deferred"),
            Err(e) => warn!(isvc = %name, error = %e, "legacy predictor retirement failed"),
        }
    }

    // Ingress for the target component, then the fallback external service.
    let ingress_target = if merged.router.is_some() {
        Some(ComponentKind::Router)
    } else if merged.decoder.is_some() {
        Some(ComponentKind::Decoder)
    } else if merged.engine.is_some() {
        Some(ComponentKind::Engine)
    } else {
        None
    };
    components::reconcile_ingress(&ctx.client, &isvc, ingress_target, ingress_mode).await?;

    let external_host = external_service::reconcile(&ctx.client, &isvc).await?;
    let url = if isvc.ingress_disabled() {
        external_host
    } else if !isvc.is_cluster_local() && ingress_target.is_some() {
        Some(format!("http://{name}.{ns}"))
    } else {
        None
    };

    // Status propagation over the componentList.
    let component_list = status::component_list(
        merged.decoder.is_some() && decoder_mode != Some(DeploymentMode::Serverless),
        merged.router.is_some() && router_mode != Some(DeploymentMode::Serverless),
    );
    let mut observations = Vec::with_capacity(component_list.len());
    for kind in component_list {
        let mode = match kind {
            ComponentKind::Engine => engine_mode,
            ComponentKind::Decoder => decoder_mode,
            ComponentKind::Router => router_mode,
            ComponentKind::Predictor => None,
        }
        .unwrap_or(DeploymentMode::RawDeployment);
        let readiness = components::component_readiness(&ctx.client, &isvc, kind, mode).await?;
        observations.push(ComponentObservation {
            kind,
            url: Some(format!(
                "http://{}.{ns}.svc.cluster.local",
                workload_name(&name, kind)
            )),
            readiness,
        });
    }

    // Compare against the stored status and update only on change.
    let stored = api.get_status(&name).await?;
    let old = stored.status.unwrap_or_default();
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let desired = status::build_status(
        &old,
        &observations,
        url,
        resolved.as_ref().map(|r| r.name.clone()),
        resolved.as_ref().map(|r| r.format.name.clone()),
        &now,
    );
    if desired != old {
        let patch = serde_json::json!({ "status": desired });
        api.patch_status(&name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;

        let was_ready = status::is_ready(&old);
        match status::is_ready(&desired) {
            Some(true) if was_ready != Some(true) => {
                publish(
                    &ctx,
                    &isvc,
                    EventType::Normal,
                    EVT_READY,
                    format!("InferenceService {name} is ready"),
                )
                .await;
            }
            Some(false) if was_ready == Some(true) => {
                publish(
                    &ctx,
                    &isvc,
                    EventType::Warning,
                    EVT_NOT_READY,
                    format!("InferenceService {name} is no longer ready"),
                )
                .await;
            }
            _ => {}
        }
    }

    Ok(Action::requeue(Duration::from_secs(30)))
}

/// Virtual deployments: status-only convergence with a synthetic URL.
async fn reconcile_virtual(
    api: &Api<InferenceService>,
    ctx: &Ctx,
    isvc: &InferenceService,
    ns: &str,
    name: &str,
) -> Result<Action> {
    let url = format!("http://{name}.{ns}");
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let stored = api.get_status(name).await?;
    let old = stored.status.unwrap_or_default();

    let mut desired = old.clone();
    desired.url = Some(url.clone());
    desired.address = Some(crate::crd::Addressable {
        url: Some(url.clone()),
    });
    desired.components = Some(
        [(
            ComponentKind::Predictor,
            ComponentStatusSpec {
                url: Some(url),
                conditions: None,
            },
        )]
        .into(),
    );
    let mut conditions = old.conditions.clone().unwrap_or_default();
    crate::resources::upsert_condition(
        &mut conditions,
        Condition {
            type_: crate::consts::COND_READY.into(),
            status: "True".into(),
            reason: Some("VirtualDeployment".into()),
            message: None,
            last_transition_time: Some(now),
        },
    );
    desired.conditions = Some(conditions);

    if desired != old {
        let patch = serde_json::json!({ "status": desired });
        api.patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        publish(
            ctx,
            isvc,
            EventType::Normal,
            EVT_READY,
            format!("InferenceService {name} is ready (virtual)"),
        )
        .await;
    }
    Ok(Action::await_change())
}

/// Fetch the referenced BaseModel or ClusterBaseModel; namespaced entries
/// shadow cluster entries unless the reference pins a kind.
async fn resolve_model(
    ctx: &Ctx,
    isvc: &InferenceService,
    ns: &str,
    mref: &ModelRef,
) -> Result<(String, ModelSpec)> {
    let fail = |reason: String| Error::ModelResolution {
        name: mref.name.clone(),
        reason,
    };

    let found: Option<ModelSpec> = match mref.kind.as_deref() {
        Some("ClusterBaseModel") => {
            let api: Api<ClusterBaseModel> = Api::all(ctx.client.clone());
            api.get_opt(&mref.name).await?.map(|m| m.spec.model)
        }
        Some("BaseModel") => {
            let api: Api<BaseModel> = Api::namespaced(ctx.client.clone(), ns);
            api.get_opt(&mref.name).await?.map(|m| m.spec.model)
        }
        _ => {
            let api: Api<BaseModel> = Api::namespaced(ctx.client.clone(), ns);
            match api.get_opt(&mref.name).await? {
                Some(m) => Some(m.spec.model),
                None => {
                    let api: Api<ClusterBaseModel> = Api::all(ctx.client.clone());
                    api.get_opt(&mref.name).await?.map(|m| m.spec.model)
                }
            }
        }
    };

    let spec = match found {
        Some(spec) if spec.disabled => {
            let err = fail("model is disabled".into());
            publish(
                ctx,
                isvc,
                EventType::Warning,
                EVT_MODEL_RECONCILE_ERROR,
                err.to_string(),
            )
            .await;
            return Err(err);
        }
        Some(spec) => spec,
        None => {
            let err = fail("model not found".into());
            publish(
                ctx,
                isvc,
                EventType::Warning,
                EVT_MODEL_RECONCILE_ERROR,
                err.to_string(),
            )
            .await;
            return Err(err);
        }
    };
    Ok((mref.name.clone(), spec))
}
