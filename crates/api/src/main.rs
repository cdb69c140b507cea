use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use gloria_api::app::{build_app, services::AppServices};
use gloria_infra::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    gloria_observability::init();

    let config = AppConfig::load()?;
    let services = Arc::new(AppServices::from_config(&config).await?);
    services
        .start_jobs(&config.jobs)
        .context("failed to start the notification worker")?;

    let addr = config.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, build_app(services.clone()))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("draining background jobs");
    tokio::task::spawn_blocking(move || services.stop_jobs()).await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
