use std::sync::Arc;

use tokio::signal;
use tokio_rustls::rustls::crypto;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub mod api;
pub mod campaign;
pub mod config;
pub mod personalize;
pub mod retry;
pub mod rotation;
pub mod transport;
pub mod validation;

pub use config::{Config, Environment};

/// Wires the campaign registry, transport cache, and HTTP layer together and
/// returns a ready-to-serve [`api::ApiServer`].
pub async fn build(config: Arc<Config>, shutdown: CancellationToken) -> api::ApiServer {
    if crypto::CryptoProvider::get_default().is_none() {
        crypto::aws_lc_rs::default_provider()
            .install_default()
            .expect("failed to install default crypto provider");
    }

    let transports = Arc::new(transport::TransportCache::new());
    let registry = Arc::new(campaign::registry::Registry::new(
        config.max_concurrent_campaigns,
        transports.clone(),
        shutdown.clone(),
    ));
    registry.clone().spawn_gc();

    let closing_transports = transports.clone();
    let closing_shutdown = shutdown.clone();
    tokio::spawn(async move {
        closing_shutdown.cancelled().await;
        closing_transports.shutdown().await;
    });

    api::ApiServer::new(config, registry, transports, shutdown)
}

pub fn init_tracing(environment: Environment) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("{}=info,tower_http=info,axum=info", env!("CARGO_CRATE_NAME")).into()
    });

    let registry = tracing_subscriber::registry().with(filter);

    match environment {
        Environment::Development => registry.with(tracing_subscriber::fmt::layer()).init(),
        Environment::Staging | Environment::Production => {
            registry.with(tracing_subscriber::fmt::layer().json()).init()
        }
    }
}

pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    tokio::select! {
        _ = token.cancelled() => {},
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
