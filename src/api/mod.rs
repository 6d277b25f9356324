//! HTTP control plane, grounded on the axum `Router`/`ApiState`/`ApiServer`
//! shape in `examples/remails-com-remails/src/api/mod.rs`: a `FromRef`-based
//! state split, a `TraceLayer`+`TimeoutLayer` middleware stack, graceful
//! shutdown via `CancellationToken`, and a `spawn` that hands the serve
//! future to `tokio::spawn`.

pub mod dto;
pub mod error;
mod handlers;
mod rate_limit;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::FromRef;
use axum::routing::{get, post};
use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::campaign::registry::Registry;
use crate::config::{ALLOWED_ORIGINS, Config};
use crate::transport::TransportCache;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ApiServerError {
    #[error("failed to bind to {0}: {1}")]
    Bind(SocketAddr, std::io::Error),
    #[error("server error: {0}")]
    Serve(std::io::Error),
}

#[derive(Clone)]
struct ApiState {
    config: Arc<Config>,
    registry: Arc<Registry>,
    transports: Arc<TransportCache>,
    started_at: Arc<Instant>,
}

impl FromRef<ApiState> for Arc<Config> {
    fn from_ref(state: &ApiState) -> Self {
        state.config.clone()
    }
}

impl FromRef<ApiState> for Arc<Registry> {
    fn from_ref(state: &ApiState) -> Self {
        state.registry.clone()
    }
}

impl FromRef<ApiState> for Arc<TransportCache> {
    fn from_ref(state: &ApiState) -> Self {
        state.transports.clone()
    }
}

impl FromRef<ApiState> for Arc<Instant> {
    fn from_ref(state: &ApiState) -> Self {
        state.started_at.clone()
    }
}

pub struct ApiServer {
    router: Router,
    socket: SocketAddr,
    shutdown: CancellationToken,
}

impl ApiServer {
    pub fn new(
        config: Arc<Config>,
        registry: Arc<Registry>,
        transports: Arc<TransportCache>,
        shutdown: CancellationToken,
    ) -> Self {
        let socket = SocketAddr::from(([0, 0, 0, 0], config.port));
        let state = ApiState {
            config,
            registry,
            transports,
            started_at: Arc::new(Instant::now()),
        };

        let cors = CorsLayer::new().allow_origin(AllowOrigin::list(
            ALLOWED_ORIGINS
                .iter()
                .map(|origin| origin.parse().expect("allowed origin must be a valid header value")),
        ));

        let smtp_test_router = Router::new()
            .route("/api/smtp/test", post(handlers::smtp_test))
            .layer(rate_limit::RateLimitLayer::new(rate_limit::SMTP_TEST));

        let campaign_start_router = Router::new()
            .route("/api/campaign/start", post(handlers::start_campaign))
            .layer(rate_limit::RateLimitLayer::new(rate_limit::CAMPAIGN_START));

        let generic_router = Router::new()
            .route("/", get(handlers::root))
            .route("/api/health", get(handlers::health))
            .route("/api/campaign/{id}/status", get(handlers::campaign_status))
            .route(
                "/api/campaign/{id}/smtp-rotation",
                get(handlers::campaign_rotation),
            )
            .route("/api/campaign/{id}/stop", post(handlers::stop_campaign))
            .route("/api/stats", get(handlers::stats))
            .layer(rate_limit::RateLimitLayer::new(rate_limit::GENERIC));

        let router = Router::new()
            .merge(smtp_test_router)
            .merge(campaign_start_router)
            .merge(generic_router)
            .fallback(handlers::not_found)
            .layer((
                TraceLayer::new_for_http(),
                TimeoutLayer::new(REQUEST_TIMEOUT),
                CompressionLayer::new(),
                cors,
            ))
            .with_state(state);

        Self {
            router,
            socket,
            shutdown,
        }
    }

    pub async fn serve(self) -> Result<(), ApiServerError> {
        let listener = TcpListener::bind(self.socket)
            .await
            .map_err(|err| ApiServerError::Bind(self.socket, err))?;

        info!("API server listening on {}", self.socket);

        axum::serve(
            listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(wait_for_shutdown(self.shutdown))
        .await
        .map_err(ApiServerError::Serve)
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            if let Err(err) = self.serve().await {
                error!("API server error: {err}");
            }
        })
    }
}

async fn wait_for_shutdown(token: CancellationToken) {
    token.cancelled().await;
}
