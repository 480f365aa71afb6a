use std::sync::Arc;

use anyhow::Context;

use govsync_infra::SyncConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    govsync_observability::init();

    let config = SyncConfig::from_env().context("configuration")?;
    tracing::info!(instance_id = %config.instance_id, "starting govsync");

    let services = Arc::new(govsync_api::app::services::build_services(&config).await?);

    if let Some(every) = config.schedule_interval {
        let jobs = services.jobs.clone();
        tracing::info!(interval_secs = every.as_secs(), "built-in scheduler enabled");
        tokio::spawn(async move { jobs.run_schedule(every).await });
    }

    let app = govsync_api::app::build_app(services);

    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;
    Ok(())
}
