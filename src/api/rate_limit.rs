//! Per-IP sliding-window rate limiting, a thin adapter the execution core
//! never imports. `tower::limit::RateLimitLayer` itself is a single global
//! window, so a per-key variant is spelled out here in the same
//! `tower::{Layer, Service}` shape.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::extract::ConnectInfo;
use axum::http::Request;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};

use crate::api::dto::ErrorResponse;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitConfig {
    pub window: Duration,
    pub max_requests: u32,
}

impl RateLimitConfig {
    pub const fn new(window: Duration, max_requests: u32) -> Self {
        Self { window, max_requests }
    }
}

/// 10 SMTP tests / 15 min.
pub const SMTP_TEST: RateLimitConfig = RateLimitConfig::new(Duration::from_secs(15 * 60), 10);
/// 5 campaign starts / hour.
pub const CAMPAIGN_START: RateLimitConfig = RateLimitConfig::new(Duration::from_secs(60 * 60), 5);
/// 100 generic API calls / 15 min.
pub const GENERIC: RateLimitConfig = RateLimitConfig::new(Duration::from_secs(15 * 60), 100);

#[derive(Default)]
struct Windows(Mutex<HashMap<IpAddr, VecDeque<Instant>>>);

impl Windows {
    fn check(&self, ip: IpAddr, config: RateLimitConfig) -> bool {
        let mut windows = self.0.lock().unwrap();
        let entries = windows.entry(ip).or_default();
        let now = Instant::now();
        while let Some(&oldest) = entries.front() {
            if now.duration_since(oldest) > config.window {
                entries.pop_front();
            } else {
                break;
            }
        }
        if entries.len() as u32 >= config.max_requests {
            return false;
        }
        entries.push_back(now);
        true
    }
}

#[derive(Clone)]
pub struct RateLimitLayer {
    windows: Arc<Windows>,
    config: RateLimitConfig,
}

impl RateLimitLayer {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            windows: Arc::new(Windows::default()),
            config,
        }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            windows: self.windows.clone(),
            config: self.config,
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    windows: Arc<Windows>,
    config: RateLimitConfig,
}

impl<S, B> Service<Request<B>> for RateLimitService<S>
where
    S: Service<Request<B>, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    B: Send + 'static,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|info| info.0.ip());
        let windows = self.windows.clone();
        let config = self.config;
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let allowed = match ip {
                Some(ip) => windows.check(ip, config),
                // no connect-info available (e.g. unit tests): fail open
                None => true,
            };

            if allowed {
                inner.call(req).await
            } else {
                Ok((
                    axum::http::StatusCode::TOO_MANY_REQUESTS,
                    axum::Json(ErrorResponse::single("rate limit exceeded")),
                )
                    .into_response())
            }
        })
    }
}
