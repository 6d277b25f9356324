//! Process-wide campaign collection: admits new campaigns under a
//! concurrency cap, hands out record handles to HTTP readers, and reclaims
//! terminal records on a timer.
//!
//! Held as an in-memory `tokio::sync::Mutex<HashMap<..>>` rather than a
//! database-backed repository, since persistence is out of scope; guarded
//! the same way `TransportCache` (`src/transport.rs`) keys and guards its
//! own handle pool.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use rand::distr::Alphanumeric;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::campaign::executor::Executor;
use crate::campaign::{CampaignConfig, CampaignRecord, CampaignStatus};
use crate::transport::TransportCache;

/// How often the garbage collector sweeps terminal records.
const GC_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// Terminal records older than this are reclaimed.
const GC_RETENTION: Duration = Duration::from_secs(2 * 60 * 60);

fn generate_id() -> String {
    let epoch_ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("campaign_{epoch_ms}_{suffix}")
}

#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_campaigns: usize,
    pub active_campaigns: usize,
    pub completed_campaigns: usize,
    pub failed_campaigns: usize,
    pub total_sent: u64,
    pub total_success: u64,
    pub total_failed: u64,
}

/// Process-wide campaign collection. Owns every `CampaignRecord`
/// exclusively; the Executor borrows its own record for the duration of its
/// run but never removes it.
pub struct Registry {
    campaigns: AsyncMutex<HashMap<String, Arc<CampaignRecord>>>,
    active_count: AtomicU32,
    max_concurrent: usize,
    transports: Arc<TransportCache>,
    shutdown: CancellationToken,
}

impl Registry {
    pub fn new(max_concurrent: usize, transports: Arc<TransportCache>, shutdown: CancellationToken) -> Self {
        Self {
            campaigns: AsyncMutex::new(HashMap::new()),
            active_count: AtomicU32::new(0),
            max_concurrent,
            transports,
            shutdown,
        }
    }

    /// Admits a campaign under the concurrency cap and starts its Executor.
    /// Validation has already happened at the HTTP boundary; this method
    /// enforces only the concurrency cap and admission bookkeeping.
    pub async fn submit(self: &Arc<Self>, config: CampaignConfig) -> Result<String, CapacityError> {
        loop {
            let current = self.active_count.load(Ordering::Acquire);
            if current as usize >= self.max_concurrent {
                return Err(CapacityError);
            }
            if self
                .active_count
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        let id = config.id.clone();
        let record = Arc::new(CampaignRecord::new(config));
        self.campaigns.lock().await.insert(id.clone(), record.clone());

        let registry = self.clone();
        let executor = Executor::new(record, self.transports.clone(), self.shutdown.clone());
        tokio::spawn(async move {
            executor.run_tracked(registry).await;
        });

        Ok(id)
    }

    pub fn next_id(&self) -> String {
        generate_id()
    }

    pub async fn get(&self, id: &str) -> Option<Arc<CampaignRecord>> {
        self.campaigns.lock().await.get(id).cloned()
    }

    /// Requests a stop, returning whether a transition actually occurred.
    pub async fn stop(&self, id: &str) -> bool {
        match self.campaigns.lock().await.get(id) {
            Some(record) => record.status.stop_if_not_terminal(),
            None => false,
        }
    }

    pub(crate) fn mark_finished(&self) {
        self.active_count.fetch_sub(1, Ordering::AcqRel);
    }

    /// Aggregates totals across every live record.
    pub async fn stats(&self) -> RegistryStats {
        let campaigns = self.campaigns.lock().await;
        let mut stats = RegistryStats {
            total_campaigns: campaigns.len(),
            active_campaigns: 0,
            completed_campaigns: 0,
            failed_campaigns: 0,
            total_sent: 0,
            total_success: 0,
            total_failed: 0,
        };

        for record in campaigns.values() {
            match record.status.get() {
                CampaignStatus::Running => stats.active_campaigns += 1,
                CampaignStatus::Completed => stats.completed_campaigns += 1,
                CampaignStatus::Error => stats.failed_campaigns += 1,
                CampaignStatus::Pending | CampaignStatus::Stopped => {}
            }
            let (sent, success, failed) = record.counters.snapshot();
            stats.total_sent += sent;
            stats.total_success += success;
            stats.total_failed += failed;
        }

        stats
    }

    /// Deletes terminal records older than `GC_RETENTION`.
    async fn gc(&self) {
        let mut campaigns = self.campaigns.lock().await;
        let before = campaigns.len();
        campaigns.retain(|_, record| {
            !(record.status.get().is_terminal() && record.start_time.elapsed() > GC_RETENTION)
        });
        let reclaimed = before - campaigns.len();
        if reclaimed > 0 {
            info!(reclaimed, "garbage-collected terminal campaign records");
        }
    }

    /// Starts the hourly GC ticker. Runs until shutdown is signalled.
    pub fn spawn_gc(self: Arc<Self>) {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(GC_INTERVAL);
            loop {
                tokio::select! {
                    _ = ticker.tick() => self.gc().await,
                    _ = self.shutdown.cancelled() => break,
                }
            }
        });
    }
}

#[derive(Debug, Clone, Copy)]
pub struct CapacityError;

impl std::fmt::Display for CapacityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "too many concurrent campaigns")
    }
}

impl std::error::Error for CapacityError {}
