//! Structural validation of campaign submissions and SMTP test requests.
//! Both validators accumulate every violation and return them all at once
//! rather than failing fast, grounded on the multi-error accumulation style
//! of `garde::Validate` usage in
//! `examples/remails-com-remails/src/api/validation.rs`, adapted here to a
//! plain accumulator since the submission schema isn't known until request
//! time (rotation vs. single relay).

use regex::Regex;
use std::sync::LazyLock;

use crate::api::dto::{CampaignSubmission, SmtpServerPayload, SmtpTestRequest};

static RECIPIENT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

#[derive(Debug, Clone)]
pub struct ValidationErrors(pub Vec<String>);

impl ValidationErrors {
    fn new() -> Self {
        Self(Vec::new())
    }

    fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    fn into_result(self) -> Result<(), ValidationErrors> {
        if self.0.is_empty() { Ok(()) } else { Err(self) }
    }
}

/// Validates a campaign submission. Every violation is collected; none
/// short-circuits the rest.
pub fn validate_submission(submission: &CampaignSubmission) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if submission.use_smtp_rotation.unwrap_or(false) {
        let servers = submission.smtp_servers.as_deref().unwrap_or(&[]);
        if servers.is_empty() {
            errors.push("smtpServers is required when useSmtpRotation is set");
        }
        for (index, server) in servers.iter().enumerate() {
            validate_server_payload(server, &mut errors, &format!("smtpServers[{index}]"));
        }
    } else {
        match &submission.smtp_server {
            Some(server) => validate_server_payload(server, &mut errors, "smtpServer"),
            None => errors.push("smtpServer is required"),
        }
    }

    if submission.recipients.is_empty() {
        errors.push("recipients must be a non-empty list");
    }
    for recipient in &submission.recipients {
        if !RECIPIENT_RE.is_match(recipient) {
            errors.push(format!("recipient '{recipient}' is not a valid email address"));
        }
    }

    if submission.subject.trim().is_empty() {
        errors.push("subject must not be empty");
    }
    if submission.content.trim().is_empty() {
        errors.push("content must not be empty");
    }

    errors.into_result()
}

fn validate_server_payload(server: &SmtpServerPayload, errors: &mut ValidationErrors, label: &str) {
    if server.host.trim().is_empty() {
        errors.push(format!("{label}.host is required"));
    }
    if server.user.trim().is_empty() {
        errors.push(format!("{label}.user is required"));
    }
    if server.secret.trim().is_empty() {
        errors.push(format!("{label}.secret is required"));
    }
}

/// Validates a standalone SMTP verification request.
pub fn validate_smtp_test(request: &SmtpTestRequest) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();

    if request.host.trim().is_empty() {
        errors.push("host is required");
    }
    if request.port == 0 {
        errors.push("port is required");
    }
    if request.user.trim().is_empty() {
        errors.push("user is required");
    }
    if request.secret.trim().is_empty() {
        errors.push("secret is required");
    }

    errors.into_result()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::dto::{CampaignSubmission, SmtpServerPayload};

    fn server() -> SmtpServerPayload {
        SmtpServerPayload {
            id: None,
            name: None,
            host: "smtp.example.com".to_string(),
            port: 587,
            user: "marketing@example.com".to_string(),
            secret: "s3cret".to_string(),
            reply_to: None,
            daily_limit: None,
        }
    }

    fn submission() -> CampaignSubmission {
        CampaignSubmission {
            smtp_server: Some(server()),
            smtp_servers: None,
            use_smtp_rotation: Some(false),
            rotation_frequency: None,
            recipients: vec!["alice@example.com".to_string()],
            subject: "Hello".to_string(),
            content: "World".to_string(),
            is_html: Some(false),
            delay_between_emails: Some(0),
            use_custom_subjects: Some(false),
            custom_subjects: None,
            use_custom_senders: Some(false),
            custom_senders: None,
            custom_reply_to: None,
            max_failures_per_server: None,
            priority: None,
        }
    }

    #[test]
    fn rejects_malformed_recipient_and_keeps_valid_fields() {
        let mut submission = submission();
        submission.recipients = vec!["bad-email".to_string(), "ok@x.io".to_string()];
        let errors = validate_submission(&submission).unwrap_err();
        assert!(errors.0.iter().any(|e| e.contains("bad-email")));
        assert!(!errors.0.iter().any(|e| e.contains("ok@x.io")));
    }

    #[test]
    fn accumulates_multiple_errors_at_once() {
        let mut submission = submission();
        submission.subject = "   ".to_string();
        submission.content = String::new();
        submission.recipients = vec![];
        let errors = validate_submission(&submission).unwrap_err();
        assert_eq!(errors.0.len(), 3);
    }

    #[test]
    fn rotation_requires_smtp_servers() {
        let mut submission = submission();
        submission.use_smtp_rotation = Some(true);
        submission.smtp_server = None;
        let errors = validate_submission(&submission).unwrap_err();
        assert!(errors.0.iter().any(|e| e.contains("smtpServers")));
    }

    #[test]
    fn accepts_well_formed_submission() {
        assert!(validate_submission(&submission()).is_ok());
    }
}
