//! Monitoring counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::health::alerts::LoadTier;

/// Lock-free counters accumulated by the health monitor.
#[derive(Debug, Default)]
pub struct MonitorStats {
    total_checks: AtomicU64,
    successful_checks: AtomicU64,
    failed_checks: AtomicU64,
    warning_alerts: AtomicU64,
    critical_alerts: AtomicU64,
    emergency_alerts: AtomicU64,
}

/// Point-in-time copy of [`MonitorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub warning_alerts: u64,
    pub critical_alerts: u64,
    pub emergency_alerts: u64,
}

impl StatsSnapshot {
    /// Fraction of checks that produced a valid payload; 1.0 before any check.
    pub fn success_rate(&self) -> f64 {
        if self.total_checks == 0 {
            1.0
        } else {
            self.successful_checks as f64 / self.total_checks as f64
        }
    }

    pub fn alerts_for(&self, tier: LoadTier) -> u64 {
        match tier {
            LoadTier::Warning => self.warning_alerts,
            LoadTier::Critical => self.critical_alerts,
            LoadTier::Emergency => self.emergency_alerts,
        }
    }
}

impl MonitorStats {
    pub fn record_check(&self, success: bool) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_checks.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_checks.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_alert(&self, tier: LoadTier) {
        let counter = match tier {
            LoadTier::Warning => &self.warning_alerts,
            LoadTier::Critical => &self.critical_alerts,
            LoadTier::Emergency => &self.emergency_alerts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            successful_checks: self.successful_checks.load(Ordering::Relaxed),
            failed_checks: self.failed_checks.load(Ordering::Relaxed),
            warning_alerts: self.warning_alerts.load(Ordering::Relaxed),
            critical_alerts: self.critical_alerts.load(Ordering::Relaxed),
            emergency_alerts: self.emergency_alerts.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.total_checks,
            &self.successful_checks,
            &self.failed_checks,
            &self.warning_alerts,
            &self.critical_alerts,
            &self.emergency_alerts,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
