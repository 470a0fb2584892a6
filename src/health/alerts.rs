//! Tiered load alerting with per-instance cooldown.
//!
//! # State Machine
//! ```text
//! observation(load)
//!     → classify: highest tier whose threshold <= load (or none)
//!     → tracker: fire if no previous alert or cooldown elapsed, else drop
//! ```
//!
//! # Design Decisions
//! - Cooldown is per instance and shared across tiers, so an escalation
//!   during cooldown only surfaces on the next eligible observation
//! - Alert state is created lazily and is not tied to registration lifetime;
//!   only an explicit reset clears it

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::AlertConfig;
use crate::registry::InstanceKey;

/// Alert severity, ascending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadTier {
    Warning,
    Critical,
    Emergency,
}

impl LoadTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoadTier::Warning => "warning",
            LoadTier::Critical => "critical",
            LoadTier::Emergency => "emergency",
        }
    }
}

impl fmt::Display for LoadTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The three ascending load thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadThresholds {
    pub warning: f64,
    pub critical: f64,
    pub emergency: f64,
}

impl LoadThresholds {
    /// Highest tier whose threshold is met, with that threshold.
    pub fn classify(&self, load: f64) -> Option<(LoadTier, f64)> {
        if load >= self.emergency {
            Some((LoadTier::Emergency, self.emergency))
        } else if load >= self.critical {
            Some((LoadTier::Critical, self.critical))
        } else if load >= self.warning {
            Some((LoadTier::Warning, self.warning))
        } else {
            None
        }
    }
}

impl Default for LoadThresholds {
    fn default() -> Self {
        Self::from(&AlertConfig::default())
    }
}

impl From<&AlertConfig> for LoadThresholds {
    fn from(config: &AlertConfig) -> Self {
        Self {
            warning: config.warning_threshold,
            critical: config.critical_threshold,
            emergency: config.emergency_threshold,
        }
    }
}

/// Cooldown bookkeeping for one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertState {
    pub service_name: String,
    pub instance_id: String,
    pub last_alert_time: Option<DateTime<Utc>>,
    pub alert_count: u64,
}

/// Per-instance alert cooldown tracker.
#[derive(Debug)]
pub struct AlertTracker {
    cooldown: TimeDelta,
    states: Mutex<HashMap<InstanceKey, AlertState>>,
}

impl AlertTracker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown: TimeDelta::from_std(cooldown).unwrap_or(TimeDelta::MAX),
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Record an alert-worthy observation now. See [`AlertTracker::try_fire_at`].
    pub fn try_fire(&self, key: &InstanceKey) -> Option<u64> {
        self.try_fire_at(key, Utc::now())
    }

    /// Fire if the instance is outside its cooldown window.
    ///
    /// Returns the instance's updated `alert_count` when the alert fires and
    /// `None` when it is suppressed.
    pub fn try_fire_at(&self, key: &InstanceKey, now: DateTime<Utc>) -> Option<u64> {
        let mut states = self.states.lock();
        let state = states.entry(key.clone()).or_insert_with(|| AlertState {
            service_name: key.service_name.clone(),
            instance_id: key.instance_id.clone(),
            last_alert_time: None,
            alert_count: 0,
        });

        let eligible = match state.last_alert_time {
            None => true,
            Some(last) => now.signed_duration_since(last) >= self.cooldown,
        };
        if !eligible {
            return None;
        }

        state.last_alert_time = Some(now);
        state.alert_count += 1;
        Some(state.alert_count)
    }

    pub fn get(&self, key: &InstanceKey) -> Option<AlertState> {
        self.states.lock().get(key).cloned()
    }

    /// Copy of every tracked state, ordered by service then instance.
    pub fn states(&self) -> Vec<AlertState> {
        let mut states: Vec<_> = self.states.lock().values().cloned().collect();
        states.sort_by(|a, b| {
            (&a.service_name, &a.instance_id).cmp(&(&b.service_name, &b.instance_id))
        });
        states
    }

    pub fn len(&self) -> usize {
        self.states.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.states.lock().clear();
    }
}
