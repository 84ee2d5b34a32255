//! Admission webhook server. TLS termination is left to the fronting
//! deployment; the handlers themselves only speak AdmissionReview JSON.

pub mod base_model;
pub mod serving_runtime;

use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use kube::Client;
use tracing::info;

#[derive(Clone)]
pub struct WebhookState {
    pub client: Client,
    pub http: reqwest::Client,
}

pub fn router(state: WebhookState) -> Router {
    Router::new()
        .route(
            "/validate-serving-modelgrid-dev-v1beta1-servingruntime",
            post(serving_runtime::validate_serving_runtime),
        )
        .route(
            "/validate-serving-modelgrid-dev-v1beta1-clusterservingruntime",
            post(serving_runtime::validate_cluster_serving_runtime),
        )
        .route(
            "/validate-serving-modelgrid-dev-v1beta1-basemodel",
            post(base_model::validate_base_model),
        )
        .route(
            "/validate-serving-modelgrid-dev-v1beta1-clusterbasemodel",
            post(base_model::validate_cluster_base_model),
        )
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

pub async fn run_webhook_server(client: Client) -> anyhow::Result<()> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;
    let state = WebhookState { client, http };

    let addr = std::env::var("WEBHOOK_ADDR").unwrap_or_else(|_| "0.0.0.0:9443".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!(%addr, "webhook server listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
