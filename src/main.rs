use tracing_subscriber::EnvFilter;

use inference_operator::{controller::run_operator, crd::print_crds_without_formats, webhooks};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if std::env::var("PRINT_CRD").is_ok() {
        print_crds_without_formats()?;
        return Ok(());
    }

    let client = kube::Client::try_default().await?;
    tokio::try_join!(
        run_operator(client.clone()),
        webhooks::run_webhook_server(client),
    )?;

    Ok(())
}
