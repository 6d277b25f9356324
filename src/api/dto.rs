//! Wire types for the HTTP control plane. Field names mirror the submission
//! schema verbatim, including the operator-facing `isHTML` casing that
//! `rename_all = "camelCase"` alone wouldn't produce.

use serde::{Deserialize, Serialize};

use crate::campaign::{CampaignConfig, RelayDescriptor};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpServerPayload {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub user: String,
    pub secret: String,
    #[serde(default)]
    pub reply_to: Option<String>,
    #[serde(default)]
    pub daily_limit: Option<u32>,
}

impl SmtpServerPayload {
    pub fn into_relay(self, index: usize) -> RelayDescriptor {
        RelayDescriptor {
            id: self.id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
            name: self.name.unwrap_or_else(|| format!("relay {}", index + 1)),
            host: self.host,
            port: if self.port == 0 { 587 } else { self.port },
            user: self.user,
            secret: self.secret,
            reply_to: self.reply_to,
            daily_limit: self.daily_limit.unwrap_or(crate::campaign::DEFAULT_DAILY_LIMIT),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignSubmission {
    #[serde(default)]
    pub smtp_server: Option<SmtpServerPayload>,
    #[serde(default)]
    pub smtp_servers: Option<Vec<SmtpServerPayload>>,
    #[serde(default)]
    pub use_smtp_rotation: Option<bool>,
    #[serde(default)]
    pub rotation_frequency: Option<u32>,
    pub recipients: Vec<String>,
    pub subject: String,
    pub content: String,
    #[serde(default, rename = "isHTML")]
    pub is_html: Option<bool>,
    #[serde(default)]
    pub delay_between_emails: Option<u64>,
    #[serde(default)]
    pub use_custom_subjects: Option<bool>,
    #[serde(default)]
    pub custom_subjects: Option<Vec<String>>,
    #[serde(default)]
    pub use_custom_senders: Option<bool>,
    #[serde(default)]
    pub custom_senders: Option<Vec<String>>,
    #[serde(default)]
    pub custom_reply_to: Option<String>,
    #[serde(default)]
    pub max_failures_per_server: Option<u32>,
    #[serde(default)]
    pub priority: Option<String>,
}

impl CampaignSubmission {
    pub fn into_config(self, id: String) -> CampaignConfig {
        let use_rotation = self.use_smtp_rotation.unwrap_or(false);
        let relays: Vec<RelayDescriptor> = if use_rotation {
            self.smtp_servers
                .unwrap_or_default()
                .into_iter()
                .enumerate()
                .map(|(index, server)| server.into_relay(index))
                .collect()
        } else {
            self.smtp_server
                .into_iter()
                .enumerate()
                .map(|(index, server)| server.into_relay(index))
                .collect()
        };

        let custom_subjects = if self.use_custom_subjects.unwrap_or(false) {
            self.custom_subjects.unwrap_or_default()
        } else {
            Vec::new()
        };
        let custom_senders = if self.use_custom_senders.unwrap_or(false) {
            self.custom_senders.unwrap_or_default()
        } else {
            Vec::new()
        };

        CampaignConfig {
            id,
            recipients: self.recipients,
            subject_template: self.subject,
            body_template: self.content,
            is_html: self.is_html.unwrap_or(false),
            delay_seconds: self
                .delay_between_emails
                .unwrap_or(crate::campaign::DEFAULT_DELAY_SECONDS),
            use_rotation,
            rotation_frequency: self.rotation_frequency,
            custom_subjects,
            custom_senders,
            custom_reply_to: self.custom_reply_to,
            max_failures_per_relay: self
                .max_failures_per_server
                .unwrap_or(crate::campaign::DEFAULT_MAX_FAILURES_PER_RELAY),
            relays,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmtpTestRequest {
    pub host: String,
    #[serde(default)]
    pub port: u16,
    pub user: String,
    pub secret: String,
    #[serde(default)]
    pub send_test_mail: Option<bool>,
    #[serde(default)]
    pub test_recipient: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

impl ErrorResponse {
    pub fn single(message: impl Into<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(message: impl Into<String>, details: Vec<String>) -> Self {
        Self {
            success: false,
            error: message.into(),
            details,
        }
    }
}
