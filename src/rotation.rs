//! Per-campaign SMTP relay rotation and health tracking: which relay sends
//! next, and when a relay is temporarily skipped after repeated failures.

use std::time::{Duration, Instant};

use serde::Serialize;

use crate::campaign::RelayDescriptor;

/// Cooldown window after a relay is deactivated before it is reconsidered.
pub const COOLDOWN: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone)]
struct RelayRuntimeState {
    descriptor: RelayDescriptor,
    active: bool,
    failure_count: u32,
    sent_count: u32,
    last_used: Option<Instant>,
    last_failure: Option<Instant>,
    /// Optional per-send latency telemetry, used as the final tiebreak in
    /// `select`. Falls back to list order when absent.
    response_time: Option<Duration>,
}

impl RelayRuntimeState {
    fn new(descriptor: RelayDescriptor) -> Self {
        Self {
            descriptor,
            active: true,
            failure_count: 0,
            sent_count: 0,
            last_used: None,
            last_failure: None,
            response_time: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RelaySnapshot {
    pub id: String,
    pub name: String,
    pub active: bool,
    pub failure_count: u32,
    pub sent_count: u32,
    pub daily_limit: u32,
    pub last_used_secs_ago: Option<u64>,
    pub last_failure_secs_ago: Option<u64>,
}

/// Per-campaign relay fleet state. Not shared across campaigns — private to
/// one campaign, with no external mutation.
pub struct RotationTracker {
    relays: std::sync::Mutex<Vec<RelayRuntimeState>>,
    current_index: std::sync::atomic::AtomicUsize,
}

impl RotationTracker {
    pub fn new(relays: Vec<RelayDescriptor>) -> Self {
        Self {
            relays: std::sync::Mutex::new(relays.into_iter().map(RelayRuntimeState::new).collect()),
            current_index: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Selects the next relay to use, atomically with respect to cooldown
    /// expiry, daily-limit filtering, and the failure/use/latency ranking.
    pub fn select(&self) -> Option<RelayDescriptor> {
        let mut relays = self.relays.lock().unwrap();
        let now = Instant::now();

        for relay in relays.iter_mut() {
            if !relay.active
                && let Some(last_failure) = relay.last_failure
                && now.duration_since(last_failure) >= COOLDOWN
            {
                relay.active = true;
                relay.failure_count = 0;
            }
        }

        let best = relays
            .iter()
            .enumerate()
            .filter(|(_, r)| r.active && r.sent_count < r.descriptor.daily_limit)
            .min_by_key(|(i, r)| (r.failure_count, r.sent_count, r.response_time, *i));

        let (index, relay) = best?;
        self.current_index.store(index, std::sync::atomic::Ordering::Relaxed);
        Some(relay.descriptor.clone())
    }

    pub fn mark_success(&self, relay_id: &str, elapsed: Option<Duration>) {
        let mut relays = self.relays.lock().unwrap();
        if let Some(relay) = relays.iter_mut().find(|r| r.descriptor.id == relay_id) {
            relay.sent_count += 1;
            relay.last_used = Some(Instant::now());
            relay.failure_count = relay.failure_count.saturating_sub(1);
            if elapsed.is_some() {
                relay.response_time = elapsed;
            }
        }
    }

    pub fn mark_failure(&self, relay_id: &str, max_failures: u32) {
        let mut relays = self.relays.lock().unwrap();
        if let Some(relay) = relays.iter_mut().find(|r| r.descriptor.id == relay_id) {
            relay.failure_count += 1;
            relay.last_failure = Some(Instant::now());
            if relay.failure_count >= max_failures {
                relay.active = false;
            }
        }
    }

    pub fn snapshot(&self) -> Vec<RelaySnapshot> {
        let relays = self.relays.lock().unwrap();
        let now = Instant::now();
        relays
            .iter()
            .map(|r| RelaySnapshot {
                id: r.descriptor.id.clone(),
                name: r.descriptor.name.clone(),
                active: r.active,
                failure_count: r.failure_count,
                sent_count: r.sent_count,
                daily_limit: r.descriptor.daily_limit,
                last_used_secs_ago: r.last_used.map(|t| now.duration_since(t).as_secs()),
                last_failure_secs_ago: r.last_failure.map(|t| now.duration_since(t).as_secs()),
            })
            .collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::campaign::RelayDescriptor;

    fn relay(id: &str, daily_limit: u32) -> RelayDescriptor {
        RelayDescriptor {
            id: id.to_string(),
            name: id.to_string(),
            host: "localhost".to_string(),
            port: 587,
            user: format!("{id}@example.com"),
            secret: "secret".to_string(),
            reply_to: None,
            daily_limit,
        }
    }

    #[test]
    fn select_is_idempotent_with_no_intervening_state_change() {
        let tracker = RotationTracker::new(vec![relay("a", 500), relay("b", 500)]);
        let first = tracker.select().unwrap();
        let second = tracker.select().unwrap();
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn relay_deactivates_at_max_failures_and_reinstates_after_cooldown() {
        let tracker = RotationTracker::new(vec![relay("a", 500)]);
        tracker.mark_failure("a", 2);
        assert_eq!(tracker.snapshot()[0].failure_count, 1);
        assert!(tracker.snapshot()[0].active);

        tracker.mark_failure("a", 2);
        assert!(!tracker.snapshot()[0].active);
        assert!(tracker.select().is_none());
    }

    #[test]
    fn relay_at_daily_limit_is_never_selected() {
        let tracker = RotationTracker::new(vec![relay("a", 1)]);
        tracker.mark_success("a", None);
        assert!(tracker.select().is_none());
    }

    #[test]
    fn selection_prefers_low_failure_low_use_relay() {
        let tracker = RotationTracker::new(vec![relay("a", 500), relay("b", 500)]);
        tracker.mark_failure("a", 10);
        let selected = tracker.select().unwrap();
        assert_eq!(selected.id, "b");
    }

    #[test]
    fn success_decrements_failure_count_bounded_at_zero() {
        let tracker = RotationTracker::new(vec![relay("a", 500)]);
        tracker.mark_success("a", None);
        assert_eq!(tracker.snapshot()[0].failure_count, 0);
    }
}
