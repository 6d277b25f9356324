//! The per-campaign send loop: paces sends, drives relay rotation, and
//! retries transient failures.
//!
//! Grounded on the recipient loop and retry/failure bookkeeping in
//! `examples/remails-com-remails/src/handler/mod.rs::send_message`
//! (`'next_rcpt` loop, `failures`/`should_reattempt` accounting) adapted from
//! "one relay per recipient resolved via DNS" to "relay chosen by the
//! rotation tracker".

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use mail_send::mail_builder::MessageBuilder;
use mail_send::mail_builder::headers::text::Text;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::campaign::registry::Registry;
use crate::campaign::{
    CampaignRecord, CampaignStatus, ErrorRecord, LogLevel, RelayDescriptor, derive_stats,
};
use crate::personalize::{self, PersonalizedMessage};
use crate::retry;
use crate::transport::TransportCache;

/// Fixed inter-send delay for the retry pass.
const RETRY_PASS_DELAY: Duration = Duration::from_secs(2);
/// Hard ceiling on entries drained from the retry queue per campaign run.
const RETRY_PASS_CAP: usize = 5;
/// Base URL used to build the `List-Unsubscribe` header and the `{{unsubscribe}}`
/// personalization token.
const UNSUBSCRIBE_BASE_URL: &str = "https://unsubscribe.example.com";

pub struct Executor {
    record: Arc<CampaignRecord>,
    transports: Arc<TransportCache>,
    shutdown: CancellationToken,
}

enum SendOutcome {
    Success,
    Failed { retryable: bool },
    /// Transport acquisition failed before a message was ever attempted.
    /// Counted, logged, and fed to the Rotation Tracker like any other
    /// failure, but never enqueued for the retry pass.
    AcquireFailed,
}

impl Executor {
    pub fn new(
        record: Arc<CampaignRecord>,
        transports: Arc<TransportCache>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            record,
            transports,
            shutdown,
        }
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    /// Runs the campaign to completion, then decrements the Registry's
    /// active-campaign counter.
    pub async fn run_tracked(self, registry: Arc<Registry>) {
        self.run().await;
        registry.mark_finished();
    }

    fn build_message<'m>(
        &self,
        relay: &'m RelayDescriptor,
        recipient: &'m str,
        personalized: &'m PersonalizedMessage,
    ) -> MessageBuilder<'m> {
        let reply_to = self
            .record
            .config
            .custom_reply_to
            .clone()
            .or_else(|| relay.reply_to.clone())
            .unwrap_or_else(|| relay.user.clone());

        let unsubscribe_url =
            format!("{UNSUBSCRIBE_BASE_URL}?email={}", urlencoding_lite(recipient));

        let builder = MessageBuilder::new()
            .from((personalized.from_name.as_str(), relay.user.as_str()))
            .to(vec![recipient])
            .reply_to(reply_to)
            .subject(personalized.subject.as_str())
            .header("X-Campaign-ID", Text::new(self.record.config.id.clone()))
            .header("X-Mailer", Text::new("campaign-engine"))
            .header(
                "List-Unsubscribe",
                Text::new(format!("<{unsubscribe_url}>")),
            );

        if self.record.config.is_html {
            builder.html_body(personalized.body.clone())
        } else {
            builder.text_body(personalized.body.clone())
        }
    }

    async fn send_to(&self, recipient: &str) -> Result<SendOutcome, ()> {
        let Some(relay) = self.record.tracker.select() else {
            return Err(());
        };

        let started = Instant::now();
        let handle = match self.transports.acquire(&relay).await {
            Ok(handle) => handle,
            Err(err) => {
                self.record.tracker.mark_failure(
                    &relay.id,
                    self.record.config.max_failures_per_relay,
                );
                self.record.errors.push(ErrorRecord {
                    recipient: recipient.to_string(),
                    message: format!("could not acquire transport: {err}"),
                    relay_name: relay.name.clone(),
                    timestamp: chrono::Utc::now(),
                });
                self.record.log.push(
                    LogLevel::Error,
                    format!("failed to connect to relay '{}' for {recipient}: {err}", relay.name),
                );
                return Ok(SendOutcome::AcquireFailed);
            }
        };

        let personalized =
            personalize::personalize(&self.record.config, &relay, recipient, UNSUBSCRIBE_BASE_URL);
        let message = self.build_message(&relay, recipient, &personalized);

        match handle.send(message).await {
            Ok(()) => {
                let elapsed = started.elapsed();
                self.record.tracker.mark_success(&relay.id, Some(elapsed));
                self.record
                    .log
                    .push(LogLevel::Info, format!("sent to {recipient} via '{}'", relay.name));
                Ok(SendOutcome::Success)
            }
            Err(err) => {
                let classification = retry::classify(&err);
                self.record.tracker.mark_failure(
                    &relay.id,
                    self.record.config.max_failures_per_relay,
                );
                self.record.errors.push(ErrorRecord {
                    recipient: recipient.to_string(),
                    message: human_readable(&err),
                    relay_name: relay.name.clone(),
                    timestamp: chrono::Utc::now(),
                });
                self.record.log.push(
                    LogLevel::Error,
                    format!(
                        "failed to send to {recipient} via '{}': {}",
                        relay.name,
                        human_readable(&err)
                    ),
                );
                Ok(SendOutcome::Failed {
                    retryable: classification.retryable,
                })
            }
        }
    }

    fn record_outcome(&self, outcome: &SendOutcome) {
        self.record.counters.sent.fetch_add(1, Ordering::AcqRel);
        match outcome {
            SendOutcome::Success => {
                self.record.counters.success.fetch_add(1, Ordering::AcqRel);
            }
            SendOutcome::Failed { .. } | SendOutcome::AcquireFailed => {
                self.record.counters.failed.fetch_add(1, Ordering::AcqRel);
            }
        }
    }

    fn log_progress(&self) {
        let (sent, _, _) = self.record.counters.snapshot();
        let total = self.record.config.recipients.len() as u64;
        let stats = derive_stats(sent, total, self.record.start_time.elapsed());
        self.record.log.push(
            LogLevel::Info,
            format!(
                "progress: {sent}/{total} sent, speed={:.1}/min, eta={:?}min",
                stats.speed_per_minute, stats.estimated_time_minutes
            ),
        );
    }

    pub async fn run(self) {
        self.record.status.set(CampaignStatus::Running);
        self.record
            .log
            .push(LogLevel::Info, "campaign started".to_string());

        let mut retry_queue: VecDeque<String> = VecDeque::new();
        let recipients = self.record.config.recipients.clone();

        'main: for (index, recipient) in recipients.iter().enumerate() {
            if self.record.status.get() != CampaignStatus::Running || self.shutdown.is_cancelled() {
                break 'main;
            }

            self.record.set_current_recipient(recipient.clone());

            match self.send_to(recipient).await {
                Ok(outcome) => {
                    self.record_outcome(&outcome);
                    if let SendOutcome::Failed { retryable: true } = outcome {
                        retry_queue.push_back(recipient.clone());
                        self.record
                            .retry_queue_len
                            .store(retry_queue.len() as u32, Ordering::Release);
                    }
                }
                Err(()) => {
                    self.record.log.push(
                        LogLevel::Error,
                        "no active relay available, aborting campaign".to_string(),
                    );
                    self.record.status.set(CampaignStatus::Error);
                    break 'main;
                }
            }

            if index + 1 < recipients.len() && self.record.status.get() == CampaignStatus::Running {
                self.log_progress();
                if self.record.config.delay_seconds > 0 {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(self.record.config.delay_seconds)) => {}
                        _ = self.shutdown.cancelled() => break 'main,
                    }
                }
            }
        }

        if self.record.status.get() == CampaignStatus::Running {
            self.run_retry_pass(&mut retry_queue).await;
        }

        if self.record.status.get() == CampaignStatus::Running {
            self.record.status.set(CampaignStatus::Completed);
        }

        let (sent, success, failed) = self.record.counters.snapshot();
        self.record.log.push(
            LogLevel::Info,
            format!(
                "campaign finished with status={:?}: sent={sent} success={success} failed={failed}",
                self.record.status.get()
            ),
        );
        self.record.set_current_recipient("<terminated>");
    }

    /// Drains up to `RETRY_PASS_CAP` entries with a fixed 2s inter-send delay.
    /// Failures here are not re-enqueued.
    async fn run_retry_pass(&self, retry_queue: &mut VecDeque<String>) {
        let attempts = retry_queue.len().min(RETRY_PASS_CAP);
        if attempts == 0 {
            return;
        }

        info!(campaign_id = %self.record.config.id, attempts, "starting retry pass");

        for i in 0..attempts {
            if self.record.status.get() != CampaignStatus::Running || self.shutdown.is_cancelled() {
                break;
            }
            let Some(recipient) = retry_queue.pop_front() else {
                break;
            };
            self.record
                .retry_queue_len
                .store(retry_queue.len() as u32, Ordering::Release);
            self.record.set_current_recipient(recipient.clone());

            debug!(
                campaign_id = %self.record.config.id,
                attempt = i + 1,
                of = attempts,
                recipient = %recipient,
                "retry attempt"
            );

            match self.send_to(&recipient).await {
                Ok(outcome) => self.record_outcome(&outcome),
                Err(()) => {
                    warn!(campaign_id = %self.record.config.id, "no active relay available during retry pass");
                    self.record.status.set(CampaignStatus::Error);
                    break;
                }
            }

            if i + 1 < attempts {
                tokio::select! {
                    _ = tokio::time::sleep(RETRY_PASS_DELAY) => {}
                    _ = self.shutdown.cancelled() => break,
                }
            }
        }
    }
}

fn human_readable(err: &mail_send::Error) -> String {
    match err {
        mail_send::Error::Io(_) => "socket error".to_string(),
        mail_send::Error::Timeout => "connection timed out".to_string(),
        mail_send::Error::Tls(_) => "TLS handshake failed".to_string(),
        mail_send::Error::Auth(_) | mail_send::Error::AuthenticationFailed(_) => {
            "authentication failed".to_string()
        }
        mail_send::Error::MissingCredentials => "missing relay credentials".to_string(),
        mail_send::Error::UnexpectedReply(response) => {
            format!("relay rejected message: {response}")
        }
        other => other.to_string(),
    }
}

fn urlencoding_lite(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
