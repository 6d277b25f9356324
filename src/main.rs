use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::info;

use campaign_engine::{Config, build, init_tracing, shutdown_signal};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Arc::new(Config::from_env().context("invalid configuration")?);
    init_tracing(config.environment);

    let shutdown = CancellationToken::new();

    let server = build(config, shutdown.clone()).await;
    let handle = server.spawn();

    shutdown_signal(shutdown.clone()).await;
    info!("received shutdown signal, stopping services");
    shutdown.cancel();

    // give the API server and any in-flight campaigns a chance to drain
    match tokio::time::timeout(std::time::Duration::from_secs(30), handle).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::error!("server task panicked: {err}"),
        Err(_) => tracing::warn!("shutdown grace period elapsed before server task finished"),
    }

    Ok(())
}
