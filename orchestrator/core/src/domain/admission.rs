// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Admission Control Domain
//!
//! Quota classes and the sliding-window rate window used to gate requests
//! per `(subject, resource)` before they reach the bus.
//!
//! The effective quota of a call is `resource profile × tier multiplier`:
//!
//! | Resource | Requests | Window |
//! |----------|----------|--------|
//! | `default` | 60 | 60s |
//! | `auth` | 5 | 60s |
//! | `backup` | 10 | 1h |
//! | `memory_search` | 30 | 60s |
//! | `agent_action` | 100 | 60s |
//! | `websocket` | 1000 | 60s |
//!
//! Tiers: `free` ×1, `pro` ×2, `enterprise` ×10.
//!
//! [`RateWindow`] keeps the admission instants of the last window (a sliding
//! log), so at most `limit` calls are admitted inside *any* interval of
//! length `window`, not just inside aligned buckets.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::{Duration, Instant};

pub const DEFAULT_RESOURCE: &str = "default";
pub const DEFAULT_TIER: &str = "free";

/// Who is asking, for what. Typically user id + endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubjectKey {
    pub subject: String,
    pub resource: String,
}

impl SubjectKey {
    pub fn new(subject: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            resource: resource.into(),
        }
    }

    /// Key on the `default` resource profile.
    pub fn subject(subject: impl Into<String>) -> Self {
        Self::new(subject, DEFAULT_RESOURCE)
    }
}

impl fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.subject, self.resource)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
    pub limit: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

impl Quota {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn per_minute(limit: u32) -> Self {
        Self::new(limit, Duration::from_secs(60))
    }
}

/// Resource profiles and tier multipliers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaTable {
    #[serde(default = "default_resources")]
    pub resources: BTreeMap<String, Quota>,
    #[serde(default = "default_tiers")]
    pub tiers: BTreeMap<String, f64>,
}

impl Default for QuotaTable {
    fn default() -> Self {
        Self {
            resources: default_resources(),
            tiers: default_tiers(),
        }
    }
}

fn default_resources() -> BTreeMap<String, Quota> {
    BTreeMap::from([
        (DEFAULT_RESOURCE.to_string(), Quota::per_minute(60)),
        ("auth".to_string(), Quota::per_minute(5)),
        ("backup".to_string(), Quota::new(10, Duration::from_secs(3600))),
        ("memory_search".to_string(), Quota::per_minute(30)),
        ("agent_action".to_string(), Quota::per_minute(100)),
        ("websocket".to_string(), Quota::per_minute(1000)),
    ])
}

fn default_tiers() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("free".to_string(), 1.0),
        ("pro".to_string(), 2.0),
        ("enterprise".to_string(), 10.0),
    ])
}

impl QuotaTable {
    /// Single-profile table, handy for tests and embedded nodes.
    pub fn uniform(quota: Quota) -> Self {
        Self {
            resources: BTreeMap::from([(DEFAULT_RESOURCE.to_string(), quota)]),
            tiers: default_tiers(),
        }
    }

    /// Effective quota. Unknown resources fall back to `default`, unknown tiers to ×1.
    pub fn quota_for(&self, resource: &str, tier: &str) -> Quota {
        let base = self
            .resources
            .get(resource)
            .or_else(|| self.resources.get(DEFAULT_RESOURCE))
            .copied()
            .unwrap_or_else(|| Quota::per_minute(60));
        let multiplier = self.tiers.get(tier).copied().unwrap_or(1.0);
        let limit = ((base.limit as f64) * multiplier).floor().max(1.0) as u32;
        Quota::new(limit, base.window)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.resources.contains_key(DEFAULT_RESOURCE) {
            return Err("admission.resources must define a 'default' profile".into());
        }
        for (name, quota) in &self.resources {
            if quota.limit == 0 || quota.window.is_zero() {
                return Err(format!("admission resource '{}' needs a non-zero limit and window", name));
            }
        }
        for (tier, multiplier) in &self.tiers {
            if !(multiplier.is_finite() && *multiplier > 0.0) {
                return Err(format!("admission tier '{}' multiplier must be positive", tier));
            }
        }
        Ok(())
    }
}

/// Outcome of one `allow` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdmissionDecision {
    pub admitted: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Zero when admitted; otherwise how long until a slot frees up.
    #[serde(with = "humantime_serde")]
    pub retry_after: Duration,
    /// Time until the whole window has drained.
    #[serde(with = "humantime_serde")]
    pub reset_after: Duration,
}

/// Sliding log of admissions for one subject key.
#[derive(Debug, Clone)]
pub struct RateWindow {
    pub subject_key: SubjectKey,
    pub tier: String,
    hits: VecDeque<Instant>,
    /// Set once the window has been purged from the table; holders must
    /// look the key up again.
    pub(crate) retired: bool,
}

impl RateWindow {
    pub fn new(subject_key: SubjectKey, tier: impl Into<String>) -> Self {
        Self {
            subject_key,
            tier: tier.into(),
            hits: VecDeque::new(),
            retired: false,
        }
    }

    pub fn window_start(&self) -> Option<Instant> {
        self.hits.front().copied()
    }

    pub fn count(&self) -> u32 {
        self.hits.len() as u32
    }

    fn rotate(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.hits.front() {
            if now.saturating_duration_since(*oldest) >= window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
    }

    fn until_oldest_expires(&self, now: Instant, window: Duration) -> Duration {
        self.hits
            .front()
            .map(|oldest| (*oldest + window).saturating_duration_since(now))
            .unwrap_or_default()
    }

    fn until_drained(&self, now: Instant, window: Duration) -> Duration {
        self.hits
            .back()
            .map(|newest| (*newest + window).saturating_duration_since(now))
            .unwrap_or_default()
    }

    /// Test-and-increment. A rejected call leaves the window untouched.
    pub fn try_admit(&mut self, now: Instant, quota: Quota) -> AdmissionDecision {
        self.rotate(now, quota.window);

        if self.count() < quota.limit {
            self.hits.push_back(now);
            AdmissionDecision {
                admitted: true,
                limit: quota.limit,
                remaining: quota.limit - self.count(),
                retry_after: Duration::ZERO,
                reset_after: self.until_drained(now, quota.window),
            }
        } else {
            AdmissionDecision {
                admitted: false,
                limit: quota.limit,
                remaining: 0,
                retry_after: self.until_oldest_expires(now, quota.window).max(Duration::from_millis(1)),
                reset_after: self.until_drained(now, quota.window),
            }
        }
    }

    /// Current usage without admitting anything.
    pub fn peek(&mut self, now: Instant, quota: Quota) -> u32 {
        self.rotate(now, quota.window);
        self.count()
    }

    /// True when every recorded hit fell out of the window.
    pub fn is_idle(&mut self, now: Instant, window: Duration) -> bool {
        self.rotate(now, window);
        self.hits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_scaling_by_tier() {
        let table = QuotaTable::default();
        assert_eq!(table.quota_for("auth", "free").limit, 5);
        assert_eq!(table.quota_for("auth", "pro").limit, 10);
        assert_eq!(table.quota_for("default", "enterprise").limit, 600);
        assert_eq!(table.quota_for("backup", "free").window, Duration::from_secs(3600));
        // unknown resource and tier fall back
        assert_eq!(table.quota_for("nope", "platinum"), Quota::per_minute(60));
    }

    #[test]
    fn test_window_denies_past_quota_without_counting() {
        let quota = Quota::per_minute(5);
        let mut window = RateWindow::new(SubjectKey::subject("user-42"), "free");
        let t0 = Instant::now();

        for expected_remaining in (0..5).rev() {
            let decision = window.try_admit(t0, quota);
            assert!(decision.admitted);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = window.try_admit(t0 + Duration::from_secs(1), quota);
        assert!(!denied.admitted);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Duration::from_secs(59));

        let again = window.try_admit(t0 + Duration::from_secs(2), quota);
        assert!(!again.admitted);
        assert_eq!(window.count(), 5);
    }

    #[test]
    fn test_window_slides() {
        let quota = Quota::new(2, Duration::from_secs(10));
        let mut window = RateWindow::new(SubjectKey::subject("u"), "free");
        let t0 = Instant::now();

        assert!(window.try_admit(t0, quota).admitted);
        assert!(window.try_admit(t0 + Duration::from_secs(6), quota).admitted);
        assert!(!window.try_admit(t0 + Duration::from_secs(9), quota).admitted);
        // the first hit has left the window; only one slot frees up
        assert!(window.try_admit(t0 + Duration::from_secs(10), quota).admitted);
        assert!(!window.try_admit(t0 + Duration::from_secs(11), quota).admitted);
        assert_eq!(window.window_start(), Some(t0 + Duration::from_secs(6)));
    }

    #[test]
    fn test_idle_detection() {
        let quota = Quota::new(3, Duration::from_secs(5));
        let mut window = RateWindow::new(SubjectKey::subject("u"), "free");
        let t0 = Instant::now();
        window.try_admit(t0, quota);

        assert!(!window.is_idle(t0 + Duration::from_secs(4), quota.window));
        assert!(window.is_idle(t0 + Duration::from_secs(5), quota.window));
    }

    #[test]
    fn test_table_validation() {
        assert!(QuotaTable::default().validate().is_ok());

        let mut table = QuotaTable::default();
        table.resources.insert("auth".into(), Quota::new(0, Duration::from_secs(60)));
        assert!(table.validate().is_err());

        let mut table = QuotaTable::default();
        table.tiers.insert("broken".into(), 0.0);
        assert!(table.validate().is_err());

        let mut table = QuotaTable::default();
        table.resources.remove(DEFAULT_RESOURCE);
        assert!(table.validate().is_err());
    }
}
