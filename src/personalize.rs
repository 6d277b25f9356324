//! Deterministic per-recipient personalization: token substitution in the
//! subject/body templates and the sender display name.

use chrono::Utc;
use rand::Rng;
use rand::seq::IndexedRandom;
use url::form_urlencoded;

use crate::campaign::{CampaignConfig, RelayDescriptor};

#[derive(Debug, Clone)]
pub struct PersonalizedMessage {
    pub subject: String,
    pub body: String,
    pub from_name: String,
}

fn user_local_part(user: &str) -> &str {
    user.split('@').next().unwrap_or(user)
}

fn split_recipient(recipient: &str) -> (&str, &str) {
    match recipient.split_once('@') {
        Some((name, domain)) => (name, domain),
        None => (recipient, ""),
    }
}

/// Generates the short pseudo-random per-send `{{ref}}` token. Regenerated
/// on every call; not meant to be cryptographically unguessable, only
/// unique enough to dedupe link-tracking clicks.
fn generate_ref() -> String {
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::rng();
    (0..8)
        .map(|_| CHARS[rng.random_range(0..CHARS.len())] as char)
        .collect()
}

fn substitute(template: &str, tokens: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in tokens {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Derives `{subject, body, from_name}` for one recipient.
///
/// `base_url` is the operator-configured unsubscribe base; the recipient is
/// percent-encoded into it as a query parameter.
pub fn personalize(
    campaign: &CampaignConfig,
    relay: &RelayDescriptor,
    recipient: &str,
    base_url: &str,
) -> PersonalizedMessage {
    let (name, domain) = split_recipient(recipient);

    let mut rng = rand::rng();

    let subject = if !campaign.custom_subjects.is_empty() {
        campaign
            .custom_subjects
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| campaign.subject_template.clone())
    } else {
        campaign.subject_template.clone()
    };

    let from_name = if !campaign.custom_senders.is_empty() {
        campaign
            .custom_senders
            .choose(&mut rng)
            .cloned()
            .unwrap_or_else(|| user_local_part(&relay.user).to_string())
    } else {
        user_local_part(&relay.user).to_string()
    };

    let now = Utc::now();
    let unsubscribe: String = form_urlencoded::Serializer::new(format!("{base_url}?"))
        .append_pair("email", recipient)
        .finish();

    let tokens = [
        ("name", name),
        ("email", recipient),
        ("domain", domain),
        ("unsubscribe", unsubscribe.as_str()),
        ("date", &now.format("%Y-%m-%d").to_string()),
        ("time", &now.format("%H:%M:%S").to_string()),
        ("campaign_id", campaign.id.as_str()),
        ("ref", &generate_ref()),
    ];

    PersonalizedMessage {
        subject: substitute(&subject, &tokens),
        body: substitute(&campaign.body_template, &tokens),
        from_name,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::campaign::CampaignConfig;

    fn relay() -> RelayDescriptor {
        RelayDescriptor {
            id: "r1".to_string(),
            name: "primary".to_string(),
            host: "smtp.example.com".to_string(),
            port: 587,
            user: "marketing@example.com".to_string(),
            secret: "s3cret".to_string(),
            reply_to: None,
            daily_limit: 500,
        }
    }

    fn config() -> CampaignConfig {
        CampaignConfig {
            id: "campaign_1".to_string(),
            recipients: vec!["alice@test.io".to_string()],
            subject_template: "Hello {{name}}".to_string(),
            body_template: "Hi {{name}} from {{domain}}, unsub: {{unsubscribe}}".to_string(),
            is_html: false,
            delay_seconds: 5,
            use_rotation: false,
            rotation_frequency: None,
            custom_subjects: vec![],
            custom_senders: vec![],
            custom_reply_to: None,
            max_failures_per_relay: 3,
            relays: vec![relay()],
        }
    }

    #[test]
    fn substitutes_tokens_deterministically_except_date_time_ref() {
        let msg = personalize(&config(), &relay(), "alice@test.io", "https://x.io/u");
        assert_eq!(msg.subject, "Hello alice");
        assert!(msg.body.contains("Hi alice from test.io"));
        assert!(msg.body.contains("unsub: https://x.io/u?email=alice%40test.io"));
        assert_eq!(msg.from_name, "marketing");
    }

    #[test]
    fn uses_custom_sender_pool_when_present() {
        let mut cfg = config();
        cfg.custom_senders = vec!["Sales Team".to_string()];
        let msg = personalize(&cfg, &relay(), "alice@test.io", "https://x.io/u");
        assert_eq!(msg.from_name, "Sales Team");
    }
}
