//! HTTP-facing error type, grounded on
//! `examples/remails-com-remails/src/api/error.rs`'s `ApiError` /
//! `IntoResponse` split, extended with the validation/not-found/capacity
//! buckets this control plane needs.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::error;

use crate::api::dto::ErrorResponse;
use crate::config::Environment;

pub type ApiResult<T> = Result<Json<T>, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("validation failed")]
    Validation(Vec<String>),
    #[error("campaign not found")]
    NotFound,
    #[error("too many concurrent campaigns")]
    CapacityExceeded,
    #[error("rate limit exceeded")]
    RateLimited,
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    /// Sanitizes internal detail outside of development mode.
    fn into_response(self) -> Response {
        let environment = Environment::from_env();
        match self {
            AppError::Validation(details) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::with_details("validation failed", details)),
            )
                .into_response(),
            AppError::NotFound => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse::single("campaign not found")),
            )
                .into_response(),
            AppError::CapacityExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse::single("too many concurrent campaigns")),
            )
                .into_response(),
            AppError::RateLimited => (
                StatusCode::TOO_MANY_REQUESTS,
                Json(ErrorResponse::single("rate limit exceeded")),
            )
                .into_response(),
            AppError::Internal(err) => {
                error!("internal API error: {err:#}");
                let message = if environment.is_development() {
                    format!("internal error: {err:#}")
                } else {
                    "internal server error".to_string()
                };
                (StatusCode::INTERNAL_SERVER_ERROR, Json(ErrorResponse::single(message)))
                    .into_response()
            }
        }
    }
}

impl From<crate::validation::ValidationErrors> for AppError {
    fn from(errors: crate::validation::ValidationErrors) -> Self {
        AppError::Validation(errors.0)
    }
}
