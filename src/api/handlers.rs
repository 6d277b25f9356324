//! HTTP handlers for the control plane surface. Each mirrors the
//! `State`-extraction + `Json` response style of
//! `examples/remails-com-remails/src/api/smtp_credentials.rs`, adapted to the
//! in-memory `Registry`/`TransportCache` this engine owns instead of a
//! `PgPool`-backed repository.

use std::sync::Arc;
use std::time::Instant;

use axum::Json;
use axum::extract::{Path, State};
use serde::Serialize;

use crate::api::dto::{CampaignSubmission, ErrorResponse, SmtpTestRequest};
use crate::api::error::{ApiResult, AppError};
use crate::campaign::registry::{Registry, RegistryStats};
use crate::transport::TransportCache;
use crate::validation;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub success: bool,
    pub status: &'static str,
    pub uptime_seconds: u64,
    pub memory: String,
    pub active_campaigns: usize,
    pub total_campaigns: usize,
}

/// Best-effort resident set size, formatted for display. `/proc/self/statm`
/// is Linux-specific; elsewhere this reports "unknown" rather than pulling
/// in a platform-abstraction crate for one field.
fn resident_memory_human() -> String {
    let Ok(statm) = std::fs::read_to_string("/proc/self/statm") else {
        return "unknown".to_string();
    };
    let Some(resident_pages) = statm.split_whitespace().nth(1).and_then(|v| v.parse::<u64>().ok())
    else {
        return "unknown".to_string();
    };
    let page_size = 4096u64;
    humansize::format_size(resident_pages * page_size, humansize::DECIMAL)
}

pub async fn health(
    State(registry): State<Arc<Registry>>,
    State(start): State<Arc<Instant>>,
) -> Json<HealthResponse> {
    let stats = registry.stats().await;
    Json(HealthResponse {
        success: true,
        status: "ok",
        uptime_seconds: start.elapsed().as_secs(),
        memory: resident_memory_human(),
        active_campaigns: stats.active_campaigns,
        total_campaigns: stats.total_campaigns,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptor {
    pub success: bool,
    pub name: &'static str,
    pub version: &'static str,
}

pub async fn root() -> Json<ServiceDescriptor> {
    Json(ServiceDescriptor {
        success: true,
        name: "campaign-engine",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct SmtpTestResponse {
    pub success: bool,
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_mail_sent: Option<bool>,
}

pub async fn smtp_test(
    State(transports): State<Arc<TransportCache>>,
    Json(request): Json<SmtpTestRequest>,
) -> Result<Json<SmtpTestResponse>, AppError> {
    validation::validate_smtp_test(&request)?;

    let send_test_mail = request.send_test_mail.unwrap_or(false);
    let test_recipient = request.test_recipient.clone();
    let relay = crate::campaign::RelayDescriptor {
        id: "smtp-test".to_string(),
        name: "smtp-test".to_string(),
        host: request.host,
        port: if request.port == 0 { 587 } else { request.port },
        user: request.user,
        secret: request.secret,
        reply_to: None,
        daily_limit: crate::campaign::DEFAULT_DAILY_LIMIT,
    };

    match transports.acquire(&relay).await {
        Ok(handle) => {
            let test_mail_sent = if send_test_mail {
                let recipient = test_recipient.unwrap_or_else(|| relay.user.clone());
                let message = mail_send::mail_builder::MessageBuilder::new()
                    .from(("SMTP test", relay.user.as_str()))
                    .to(vec![recipient.as_str()])
                    .subject("SMTP relay test")
                    .text_body("This is a test email confirming your SMTP relay is working.");
                Some(handle.send(message).await.is_ok())
            } else {
                None
            };
            Ok(Json(SmtpTestResponse {
                success: true,
                verified: true,
                error: None,
                test_mail_sent,
            }))
        }
        Err(err) => Ok(Json(SmtpTestResponse {
            success: false,
            verified: false,
            error: Some(err.to_string()),
            test_mail_sent: None,
        })),
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartCampaignResponse {
    pub success: bool,
    pub campaign_id: String,
}

pub async fn start_campaign(
    State(registry): State<Arc<Registry>>,
    Json(submission): Json<CampaignSubmission>,
) -> Result<Json<StartCampaignResponse>, AppError> {
    validation::validate_submission(&submission)?;

    let id = registry.next_id();
    let config = submission.into_config(id);
    let campaign_id = registry
        .submit(config)
        .await
        .map_err(|_| AppError::CapacityExceeded)?;

    Ok(Json(StartCampaignResponse {
        success: true,
        campaign_id,
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct CampaignStatusResponse {
    pub success: bool,
    pub id: String,
    pub status: crate::campaign::CampaignStatus,
    pub sent: u64,
    pub success_count: u64,
    pub failed: u64,
    pub total_recipients: usize,
    pub current_recipient: String,
    pub retry_queue_len: u32,
    pub speed_per_minute: f64,
    pub estimated_time_minutes: Option<u64>,
    pub logs: Vec<crate::campaign::LogLine>,
    pub errors: Vec<crate::campaign::ErrorRecord>,
}

pub async fn campaign_status(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<String>,
) -> ApiResult<CampaignStatusResponse> {
    let record = registry.get(&id).await.ok_or(AppError::NotFound)?;
    let (sent, success_count, failed) = record.counters.snapshot();
    let stats = crate::campaign::derive_stats(
        sent,
        record.config.recipients.len() as u64,
        record.start_time.elapsed(),
    );

    Ok(Json(CampaignStatusResponse {
        success: true,
        id: record.config.id.clone(),
        status: record.status.get(),
        sent,
        success_count,
        failed,
        total_recipients: record.config.recipients.len(),
        current_recipient: record.current_recipient(),
        retry_queue_len: record.retry_queue_len.load(std::sync::atomic::Ordering::Acquire),
        speed_per_minute: stats.speed_per_minute,
        estimated_time_minutes: stats.estimated_time_minutes,
        logs: record.log.last(50),
        errors: record.errors.last(10),
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct RotationStateResponse {
    pub success: bool,
    pub relays: Vec<crate::rotation::RelaySnapshot>,
}

pub async fn campaign_rotation(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<String>,
) -> ApiResult<RotationStateResponse> {
    let record = registry.get(&id).await.ok_or(AppError::NotFound)?;
    Ok(Json(RotationStateResponse {
        success: true,
        relays: record.tracker.snapshot(),
    }))
}

#[derive(Debug, Clone, Serialize)]
pub struct StopCampaignResponse {
    pub success: bool,
    pub stopped: bool,
}

pub async fn stop_campaign(
    State(registry): State<Arc<Registry>>,
    Path(id): Path<String>,
) -> ApiResult<StopCampaignResponse> {
    if registry.get(&id).await.is_none() {
        return Err(AppError::NotFound);
    }
    let stopped = registry.stop(&id).await;
    Ok(Json(StopCampaignResponse { success: true, stopped }))
}

#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: RegistryStats,
    pub success: bool,
}

pub async fn stats(State(registry): State<Arc<Registry>>) -> Json<StatsResponse> {
    Json(StatsResponse {
        stats: registry.stats().await,
        success: true,
    })
}

pub async fn not_found() -> impl axum::response::IntoResponse {
    (
        axum::http::StatusCode::NOT_FOUND,
        Json(ErrorResponse::single("not found")),
    )
}
