//! Campaign data model and the components built on top of it: the
//! Executor and the Registry.

pub mod executor;
pub mod registry;

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rotation::RotationTracker;

pub const DEFAULT_DAILY_LIMIT: u32 = 500;
pub const DEFAULT_MAX_FAILURES_PER_RELAY: u32 = 3;
pub const DEFAULT_DELAY_SECONDS: u64 = 5;

/// Bounded ring capacity for the per-campaign log: the status endpoint only
/// ever surfaces the last 50 lines, but keeping a few hundred around lets an
/// operator scroll back a little further without unbounded growth over a
/// long-running campaign.
const LOG_RING_CAPACITY: usize = 500;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayDescriptor {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub secret: String,
    pub reply_to: Option<String>,
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
}

fn default_daily_limit() -> u32 {
    DEFAULT_DAILY_LIMIT
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Pending,
    Running,
    Completed,
    Stopped,
    Error,
}

impl CampaignStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CampaignStatus::Pending,
            1 => CampaignStatus::Running,
            2 => CampaignStatus::Completed,
            3 => CampaignStatus::Stopped,
            _ => CampaignStatus::Error,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            CampaignStatus::Pending => 0,
            CampaignStatus::Running => 1,
            CampaignStatus::Completed => 2,
            CampaignStatus::Stopped => 3,
            CampaignStatus::Error => 4,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Stopped | CampaignStatus::Error
        )
    }
}

/// Atomically-backed status cell shared between the Executor (writer) and
/// HTTP status readers, so a status read never blocks the Executor.
#[derive(Debug)]
pub struct AtomicStatus(AtomicU8);

impl AtomicStatus {
    fn new(initial: CampaignStatus) -> Self {
        Self(AtomicU8::new(initial.as_u8()))
    }

    pub fn get(&self) -> CampaignStatus {
        CampaignStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: CampaignStatus) {
        self.0.store(status.as_u8(), Ordering::Release);
    }

    /// Transitions to `Stopped` only if the current status is not already
    /// terminal. Returns whether a transition occurred.
    pub fn stop_if_not_terminal(&self) -> bool {
        loop {
            let current = CampaignStatus::from_u8(self.0.load(Ordering::Acquire));
            if current.is_terminal() {
                return false;
            }
            if self
                .0
                .compare_exchange(
                    current.as_u8(),
                    CampaignStatus::Stopped.as_u8(),
                    Ordering::AcqRel,
                    Ordering::Acquire,
                )
                .is_ok()
            {
                return true;
            }
        }
    }
}

/// Immutable once the campaign starts: the Registry builds this once at
/// admission time and never mutates it again.
#[derive(Debug, Clone)]
pub struct CampaignConfig {
    pub id: String,
    pub recipients: Vec<String>,
    pub subject_template: String,
    pub body_template: String,
    pub is_html: bool,
    pub delay_seconds: u64,
    pub use_rotation: bool,
    /// Accepted for schema compatibility but not consulted by the rotation
    /// algorithm: `select()` ranks purely on failure count, send count, and
    /// latency, with no frequency-gated rotation step. See DESIGN.md.
    pub rotation_frequency: Option<u32>,
    pub custom_subjects: Vec<String>,
    pub custom_senders: Vec<String>,
    pub custom_reply_to: Option<String>,
    pub max_failures_per_relay: u32,
    pub relays: Vec<RelayDescriptor>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub recipient: String,
    pub message: String,
    pub relay_name: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

/// Bounded append-only ring buffer for campaign-facing log lines, distinct
/// from process-wide `tracing` output.
#[derive(Debug, Default)]
pub struct LogRing(Mutex<VecDeque<LogLine>>);

impl LogRing {
    pub fn push(&self, level: LogLevel, message: impl Into<String>) {
        let mut lines = self.0.lock().unwrap();
        if lines.len() == LOG_RING_CAPACITY {
            lines.pop_front();
        }
        lines.push_back(LogLine {
            timestamp: Utc::now(),
            level,
            message: message.into(),
        });
    }

    pub fn last(&self, n: usize) -> Vec<LogLine> {
        let lines = self.0.lock().unwrap();
        lines.iter().rev().take(n).rev().cloned().collect()
    }
}

#[derive(Debug, Default)]
pub struct ErrorLog(Mutex<Vec<ErrorRecord>>);

impl ErrorLog {
    pub fn push(&self, record: ErrorRecord) {
        self.0.lock().unwrap().push(record);
    }

    pub fn last(&self, n: usize) -> Vec<ErrorRecord> {
        let errors = self.0.lock().unwrap();
        let start = errors.len().saturating_sub(n);
        errors[start..].to_vec()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }
}

#[derive(Debug, Default)]
pub struct CampaignCounters {
    pub sent: AtomicU64,
    pub success: AtomicU64,
    pub failed: AtomicU64,
}

impl CampaignCounters {
    pub fn snapshot(&self) -> (u64, u64, u64) {
        (
            self.sent.load(Ordering::Acquire),
            self.success.load(Ordering::Acquire),
            self.failed.load(Ordering::Acquire),
        )
    }
}

/// The full per-campaign record the Registry owns and the Executor drives.
/// Reads never block the Executor: counters are atomics, the log and errors
/// are their own mutexes independent from the status cell, and `config`
/// never changes after construction.
pub struct CampaignRecord {
    pub config: CampaignConfig,
    pub status: AtomicStatus,
    pub counters: CampaignCounters,
    pub current_recipient: Mutex<String>,
    pub retry_queue_len: AtomicU32,
    pub start_time: Instant,
    pub start_time_utc: DateTime<Utc>,
    pub log: LogRing,
    pub errors: ErrorLog,
    pub tracker: RotationTracker,
}

impl CampaignRecord {
    pub fn new(config: CampaignConfig) -> Self {
        let tracker = RotationTracker::new(config.relays.clone());
        Self {
            config,
            status: AtomicStatus::new(CampaignStatus::Pending),
            counters: CampaignCounters::default(),
            current_recipient: Mutex::new(String::new()),
            retry_queue_len: AtomicU32::new(0),
            start_time: Instant::now(),
            start_time_utc: Utc::now(),
            log: LogRing::default(),
            errors: ErrorLog::default(),
            tracker,
        }
    }

    pub fn set_current_recipient(&self, recipient: impl Into<String>) {
        *self.current_recipient.lock().unwrap() = recipient.into();
    }

    pub fn current_recipient(&self) -> String {
        self.current_recipient.lock().unwrap().clone()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DerivedStats {
    pub speed_per_minute: f64,
    pub remaining: u64,
    pub estimated_time_minutes: Option<u64>,
}

/// Derived pacing metrics: speed, remaining, and ETA.
pub fn derive_stats(sent: u64, total_recipients: u64, elapsed: std::time::Duration) -> DerivedStats {
    let elapsed_minutes = (elapsed.as_secs_f64() / 60.0).max(1.0 / 60.0);
    let speed = sent as f64 / elapsed_minutes;
    let remaining = total_recipients.saturating_sub(sent);
    let estimated_time_minutes = if speed > 0.0 {
        Some((remaining as f64 / speed).ceil() as u64)
    } else {
        None
    };

    DerivedStats {
        speed_per_minute: speed,
        remaining,
        estimated_time_minutes,
    }
}
