use color_eyre::eyre;
use dsm_engine::{connect_docker, shutdown_signal, DockerRuntime, ServiceConfig, ServiceContext};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    dotenvy::dotenv().ok();
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting Docker Service Manager...");

    let config = ServiceConfig::from_env()?;
    let docker = connect_docker(&config).map_err(|e| eyre::eyre!("{e:#}"))?;
    let version = docker.version().await?;
    info!(
        version = version.version.as_deref().unwrap_or("unknown"),
        "Connected to Docker daemon"
    );

    let runtime = Arc::new(DockerRuntime::new(Arc::new(docker)));
    let context = ServiceContext::new(runtime, config);
    info!("ServiceContext initialized.");

    context
        .monitor()
        .run(shutdown_signal(tokio::signal::ctrl_c()))
        .await;

    info!("Docker Service Manager stopped");
    Ok(())
}
