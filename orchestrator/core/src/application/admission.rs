// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Admission Controller
//!
//! Gates requests per [`SubjectKey`] before they reach the bus. Rate windows
//! live in an arena keyed by subject, each behind its own mutex: calls for
//! the same subject serialize on that window's test-and-increment, calls for
//! different subjects never contend.
//!
//! Idle windows are purged in the background. A window is marked retired
//! while still locked and then removed from the table; a caller that fetched
//! it just before removal sees the flag and looks the key up again, so no
//! call is ever admitted against a window that has left the table.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Sliding-window rate limiting

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::interval;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::domain::admission::{AdmissionDecision, QuotaTable, RateWindow, SubjectKey, DEFAULT_TIER};
use crate::domain::node_config::AdmissionConfig;

/// Per-resource usage for one subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub resource: String,
    pub tier: String,
    pub used: u32,
    pub limit: u32,
    pub remaining: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

pub struct AdmissionController {
    windows: DashMap<SubjectKey, Arc<Mutex<RateWindow>>>,
    quotas: QuotaTable,
    default_tier: String,
}

impl AdmissionController {
    pub fn new(quotas: QuotaTable) -> Self {
        Self {
            windows: DashMap::new(),
            quotas,
            default_tier: DEFAULT_TIER.to_string(),
        }
    }

    pub fn from_config(config: &AdmissionConfig) -> Self {
        Self {
            windows: DashMap::new(),
            quotas: config.quotas.clone(),
            default_tier: config.default_tier.clone(),
        }
    }

    pub fn default_tier(&self) -> &str {
        &self.default_tier
    }

    pub fn quotas(&self) -> &QuotaTable {
        &self.quotas
    }

    pub fn allow(&self, key: &SubjectKey, tier: &str) -> AdmissionDecision {
        self.allow_at(key, tier, Instant::now())
    }

    pub fn allow_at(&self, key: &SubjectKey, tier: &str, now: Instant) -> AdmissionDecision {
        let quota = self.quotas.quota_for(&key.resource, tier);

        loop {
            let window = Arc::clone(
                self.windows
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(RateWindow::new(key.clone(), tier))))
                    .value(),
            );

            let mut guard = window.lock();
            if guard.retired {
                continue;
            }
            if guard.tier != tier {
                guard.tier = tier.to_string();
            }
            let decision = guard.try_admit(now, quota);
            drop(guard);

            let outcome = if decision.admitted { "admitted" } else { "denied" };
            metrics::counter!(
                "switchboard_admission_total",
                "resource" => key.resource.clone(),
                "outcome" => outcome
            )
            .increment(1);
            debug!(
                subject = %key,
                tier,
                admitted = decision.admitted,
                remaining = decision.remaining,
                "Admission decision"
            );
            return decision;
        }
    }

    /// Current usage of every resource `subject` has touched.
    pub fn usage(&self, subject: &str) -> Vec<UsageReport> {
        self.usage_at(subject, Instant::now())
    }

    pub fn usage_at(&self, subject: &str, now: Instant) -> Vec<UsageReport> {
        let windows: Vec<Arc<Mutex<RateWindow>>> = self
            .windows
            .iter()
            .filter(|entry| entry.key().subject == subject)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut reports: Vec<UsageReport> = windows
            .iter()
            .filter_map(|window| {
                let mut window = window.lock();
                if window.retired {
                    return None;
                }
                let quota = self.quotas.quota_for(&window.subject_key.resource, &window.tier);
                let used = window.peek(now, quota);
                Some(UsageReport {
                    resource: window.subject_key.resource.clone(),
                    tier: window.tier.clone(),
                    used,
                    limit: quota.limit,
                    remaining: quota.limit.saturating_sub(used),
                    window: quota.window,
                })
            })
            .collect();
        reports.sort_by(|a, b| a.resource.cmp(&b.resource));
        reports
    }

    /// Clear `subject`'s windows, or only the one for `resource`. Returns
    /// how many windows were dropped.
    pub fn reset(&self, subject: &str, resource: Option<&str>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|key, window| {
            let matches = key.subject == subject && resource.is_none_or(|r| key.resource == r);
            if matches {
                window.lock().retired = true;
            }
            !matches
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            info!(subject, resource = ?resource, removed, "Reset rate limits");
        }
        removed
    }

    /// Drop windows whose every admission has aged out.
    pub fn purge_idle(&self) -> usize {
        self.purge_idle_at(Instant::now())
    }

    pub fn purge_idle_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|key, window| {
            let window_len = self.quotas.quota_for(&key.resource, DEFAULT_TIER).window;
            let mut window = window.lock();
            if window.is_idle(now, window_len) {
                window.retired = true;
                false
            } else {
                true
            }
        });
        before.saturating_sub(self.windows.len())
    }

    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }

    /// Periodically purge idle windows until `shutdown` fires.
    pub fn start_purger(self: Arc<Self>, every: Duration, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval(every);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let purged = self.purge_idle();
                        if purged > 0 {
                            debug!(purged, "Purged idle rate windows");
                        }
                    }
                    _ = shutdown.cancelled() => {
                        debug!("Shutdown signal received, stopping rate window purger");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::admission::Quota;
    use std::sync::Barrier;

    fn controller(limit: u32) -> AdmissionController {
        AdmissionController::new(QuotaTable::uniform(Quota::per_minute(limit)))
    }

    #[test]
    fn test_sixth_rapid_call_is_denied() {
        let controller = controller(5);
        let key = SubjectKey::subject("user-42");

        for _ in 0..5 {
            assert!(controller.allow(&key, "free").admitted);
        }
        let denied = controller.allow(&key, "free");
        assert!(!denied.admitted);
        assert!(denied.retry_after > Duration::ZERO);
    }

    #[test]
    fn test_denied_calls_do_not_reduce_remaining() {
        let controller = controller(2);
        let key = SubjectKey::subject("user-7");
        let t0 = Instant::now();

        controller.allow_at(&key, "free", t0);
        controller.allow_at(&key, "free", t0);
        for _ in 0..10 {
            let decision = controller.allow_at(&key, "free", t0);
            assert!(!decision.admitted);
            assert_eq!(decision.remaining, 0);
        }
        assert_eq!(controller.usage_at("user-7", t0)[0].used, 2);

        // one minute later both slots are free again
        let later = controller.allow_at(&key, "free", t0 + Duration::from_secs(60));
        assert!(later.admitted);
        assert_eq!(later.remaining, 1);
    }

    #[test]
    fn test_tier_multiplies_quota() {
        let controller = controller(5);
        let key = SubjectKey::subject("user-pro");
        let admitted = (0..20).filter(|_| controller.allow(&key, "pro").admitted).count();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_subjects_and_resources_are_independent() {
        let controller = AdmissionController::new(QuotaTable::default());
        let auth = SubjectKey::new("user-1", "auth");
        let search = SubjectKey::new("user-1", "memory_search");

        for _ in 0..5 {
            assert!(controller.allow(&auth, "free").admitted);
        }
        assert!(!controller.allow(&auth, "free").admitted);
        assert!(controller.allow(&search, "free").admitted);
        assert!(controller.allow(&SubjectKey::new("user-2", "auth"), "free").admitted);

        let usage = controller.usage("user-1");
        assert_eq!(usage.len(), 2);
        assert_eq!(usage[0].resource, "auth");
        assert_eq!(usage[0].remaining, 0);
        assert_eq!(usage[1].limit, 30);
    }

    #[test]
    fn test_hundred_concurrent_callers_never_exceed_quota() {
        let controller = controller(10);
        let key = SubjectKey::subject("user-hot");
        let barrier = Barrier::new(100);
        let (controller, key, barrier) = (&controller, &key, &barrier);

        let admitted: usize = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..100)
                .map(|_| {
                    scope.spawn(move || {
                        barrier.wait();
                        controller.allow(key, "free").admitted as usize
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).sum()
        });

        assert_eq!(admitted, 10);
    }

    #[test]
    fn test_reset_clears_selected_windows() {
        let controller = AdmissionController::new(QuotaTable::default());
        controller.allow(&SubjectKey::new("u", "auth"), "free");
        controller.allow(&SubjectKey::new("u", "backup"), "free");
        controller.allow(&SubjectKey::new("other", "auth"), "free");

        assert_eq!(controller.reset("u", Some("auth")), 1);
        assert_eq!(controller.reset("u", None), 1);
        assert_eq!(controller.tracked_windows(), 1);
        assert!(controller.usage("u").is_empty());
    }

    #[test]
    fn test_purge_only_drops_idle_windows() {
        let controller = controller(3);
        let t0 = Instant::now();
        controller.allow_at(&SubjectKey::subject("old"), "free", t0);
        controller.allow_at(&SubjectKey::subject("fresh"), "free", t0 + Duration::from_secs(50));

        assert_eq!(controller.purge_idle_at(t0 + Duration::from_secs(61)), 1);
        assert_eq!(controller.tracked_windows(), 1);

        // a purged subject starts over with a full quota
        let decision = controller.allow_at(&SubjectKey::subject("old"), "free", t0 + Duration::from_secs(62));
        assert_eq!(decision.remaining, 2);
    }
}
