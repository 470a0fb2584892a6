//! Background health monitor.
//!
//! # Responsibilities
//! - Probe every registered instance once per cycle, bounded by a semaphore
//! - Write status and load back into the store
//! - Evaluate tiered load alerts
//! - Sweep instances whose heartbeat exceeded the TTL
//!
//! # Cycle
//! ```text
//! snapshot (store lock) → release lock
//!     → probe all, at most N in flight → update store, evaluate alerts
//!     → sweep expired
//!     → sleep max(0, interval - elapsed), or exit on stop
//! ```
//!
//! Probes run inside the monitor task, so `stop()` abandons any probe still
//! in flight and nothing writes to the store after it returns.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time;

use crate::config::RegistryConfig;
use crate::health::alerts::{AlertState, AlertTracker, LoadThresholds, LoadTier};
use crate::health::probe::{HealthPayload, ProbeError, Prober};
use crate::health::stats::{MonitorStats, StatsSnapshot};
use crate::lifecycle::shutdown::Shutdown;
use crate::observability::metrics;
use crate::registry::{InstanceKey, InstanceStatus, InstanceStore, ServiceInstance};
use crate::resilience::RetryPolicy;

/// Pause after a cycle that panicked.
const CYCLE_PANIC_BACKOFF: Duration = Duration::from_secs(5);

/// Summary of one completed monitoring cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub instances_checked: usize,
    pub expired: usize,
}

/// Monitoring overview served by the transport layer.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringHealth {
    pub enabled: bool,
    pub running: bool,
    pub stats: StatsSnapshot,
    pub success_rate: f64,
    pub tracked_alert_states: usize,
    pub max_concurrent_checks: usize,
    pub last_cycle: Option<CycleReport>,
}

/// Outcome of probing a single instance.
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub status: InstanceStatus,
    pub load_percentage: f64,
    pub alert: Option<LoadTier>,
}

struct RunningTask {
    shutdown: Shutdown,
    handle: JoinHandle<()>,
}

pub struct HealthMonitor {
    store: Arc<InstanceStore>,
    prober: Prober,
    enabled: bool,
    interval: Duration,
    ttl: Duration,
    success_status: String,
    max_concurrent: usize,
    semaphore: Semaphore,
    thresholds: LoadThresholds,
    alerts: AlertTracker,
    stats: MonitorStats,
    task: Mutex<Option<RunningTask>>,
    last_cycle: Mutex<Option<CycleReport>>,
}

impl HealthMonitor {
    pub fn new(store: Arc<InstanceStore>, config: &RegistryConfig) -> Self {
        let monitoring = &config.monitoring;
        let max_concurrent = monitoring.max_concurrent_checks.max(1);

        Self {
            store,
            prober: Prober::new(monitoring.timeout(), RetryPolicy::from(&config.retries)),
            enabled: monitoring.enabled,
            interval: monitoring.interval(),
            ttl: config.registry.ttl(),
            success_status: monitoring.success_status.clone(),
            max_concurrent,
            semaphore: Semaphore::new(max_concurrent),
            thresholds: LoadThresholds::from(&config.alerts),
            alerts: AlertTracker::new(config.alerts.cooldown()),
            stats: MonitorStats::default(),
            task: Mutex::new(None),
            last_cycle: Mutex::new(None),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Spawn the monitoring loop.
    ///
    /// Returns `false` when monitoring is disabled or the loop is already
    /// running. Must be called from within a Tokio runtime.
    pub fn start(self: &Arc<Self>) -> bool {
        if !self.enabled {
            tracing::info!("Health monitoring disabled");
            return false;
        }

        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }

        tracing::info!(
            interval = ?self.interval,
            max_concurrent = self.max_concurrent,
            ttl = ?self.ttl,
            "Health monitor starting"
        );

        let shutdown = Shutdown::new();
        let handle = tokio::spawn(Arc::clone(self).run(shutdown.subscribe()));
        *task = Some(RunningTask { shutdown, handle });
        true
    }

    /// Stop the loop and wait until it has exited. No-op when not running.
    pub async fn stop(&self) {
        let Some(running) = self.task.lock().take() else {
            return;
        };

        running.shutdown.trigger();
        if let Err(e) = running.handle.await {
            tracing::error!(error = %e, "Health monitor task ended abnormally");
        }
        tracing::info!("Health monitor stopped");
    }

    async fn run(self: Arc<Self>, shutdown: broadcast::Receiver<()>) {
        let monitor = &*self;
        drive_cycles(monitor.interval, CYCLE_PANIC_BACKOFF, shutdown, move || {
            monitor.run_cycle()
        })
        .await;
    }

    /// Run one full cycle: probe everything, then sweep expired instances.
    pub async fn run_cycle(&self) -> CycleReport {
        let started_at = Utc::now();
        let clock = Instant::now();

        let instances_checked = self.check_all().await;
        let expired = self.store.sweep_expired(self.ttl);
        if expired > 0 {
            tracing::info!(expired, "Cleaned up expired instances");
        }

        let duration = clock.elapsed();
        metrics::record_cycle_duration(duration);

        let report = CycleReport {
            started_at,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            instances_checked,
            expired,
        };
        *self.last_cycle.lock() = Some(report.clone());
        report
    }

    /// Probe every instance in the current snapshot and wait for all probes.
    ///
    /// Returns the number of instances probed.
    pub async fn check_all(&self) -> usize {
        let instances = self.store.snapshot();
        let count = instances.len();

        let probes = instances.into_iter().map(|instance| async move {
            let Ok(_permit) = self.semaphore.acquire().await else {
                return;
            };
            let key = instance.key();
            self.guard_check(&key, self.check_instance(&instance)).await;
        });
        join_all(probes).await;

        count
    }

    /// Run one check, counting a panic inside it as a failed check.
    async fn guard_check<F>(&self, key: &InstanceKey, check: F) -> Option<F::Output>
    where
        F: Future,
    {
        match AssertUnwindSafe(check).catch_unwind().await {
            Ok(outcome) => Some(outcome),
            Err(_) => {
                tracing::error!(instance = %key, "Health probe panicked");
                self.stats.record_check(false);
                metrics::record_check(false);
                None
            }
        }
    }

    /// Probe one instance and apply the result.
    pub async fn check_instance(&self, instance: &ServiceInstance) -> CheckOutcome {
        let result = self.prober.probe(instance).await;
        self.apply_result(instance, result)
    }

    fn apply_result(
        &self,
        instance: &ServiceInstance,
        result: Result<HealthPayload, ProbeError>,
    ) -> CheckOutcome {
        let service = instance.service_name.as_str();
        let id = instance.instance_id.as_str();

        let payload = match result {
            Ok(payload) => payload,
            Err(e) => {
                match &e {
                    ProbeError::InvalidPayload { reason, body } => tracing::warn!(
                        service, instance = id, reason = %reason, payload = %body,
                        "Invalid health response"
                    ),
                    ProbeError::Status(status) => tracing::warn!(
                        service, instance = id, status = %status,
                        "Health check failed: non-success status"
                    ),
                    ProbeError::Timeout(_) => tracing::warn!(
                        service, instance = id, attempts = self.prober.retry_policy().max_attempts(),
                        "Health check timed out after all attempts"
                    ),
                    _ => tracing::error!(
                        service, instance = id, error = %e,
                        "Health check error"
                    ),
                }

                self.stats.record_check(false);
                metrics::record_check(false);
                self.store
                    .update_health(service, id, InstanceStatus::Unhealthy, 0.0);

                return CheckOutcome {
                    status: InstanceStatus::Unhealthy,
                    load_percentage: 0.0,
                    alert: None,
                };
            }
        };

        let status = if payload.status == self.success_status {
            InstanceStatus::Healthy
        } else {
            InstanceStatus::Unhealthy
        };

        self.stats.record_check(true);
        metrics::record_check(true);

        // The instance may have been unregistered while the probe was in flight.
        if !self
            .store
            .update_health(service, id, status, payload.load_percentage)
        {
            tracing::debug!(service, instance = id, "Probed instance no longer registered");
        }

        tracing::debug!(
            service,
            instance = id,
            status = %status,
            load = payload.load_percentage,
            "Health check completed"
        );

        let alert = self.evaluate_load(&instance.key(), payload.load_percentage);
        CheckOutcome {
            status,
            load_percentage: payload.load_percentage,
            alert,
        }
    }

    /// Evaluate load against the alert tiers now.
    pub fn evaluate_load(&self, key: &InstanceKey, load: f64) -> Option<LoadTier> {
        self.evaluate_load_at(key, load, Utc::now())
    }

    /// Evaluate load against the alert tiers, returning the tier that fired.
    ///
    /// Observations inside the instance's cooldown window return `None` and
    /// change no counters.
    pub fn evaluate_load_at(
        &self,
        key: &InstanceKey,
        load: f64,
        now: DateTime<Utc>,
    ) -> Option<LoadTier> {
        let (tier, threshold) = self.thresholds.classify(load)?;
        let alert_count = self.alerts.try_fire_at(key, now)?;

        self.stats.record_alert(tier);
        metrics::record_alert(tier);

        match tier {
            LoadTier::Warning => tracing::warn!(
                service = %key.service_name,
                instance = %key.instance_id,
                tier = %tier,
                load,
                threshold,
                alert_count,
                "Load alert"
            ),
            LoadTier::Critical | LoadTier::Emergency => tracing::error!(
                service = %key.service_name,
                instance = %key.instance_id,
                tier = %tier,
                load,
                threshold,
                alert_count,
                "Load alert"
            ),
        }

        Some(tier)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Zero every counter and forget all alert cooldown state.
    pub fn reset_stats(&self) {
        self.stats.reset();
        self.alerts.clear();
        tracing::info!("Monitoring statistics reset");
    }

    pub fn alert_states(&self) -> Vec<AlertState> {
        self.alerts.states()
    }

    pub fn alert_state(&self, key: &InstanceKey) -> Option<AlertState> {
        self.alerts.get(key)
    }

    pub fn last_cycle(&self) -> Option<CycleReport> {
        self.last_cycle.lock().clone()
    }

    pub fn monitoring_health(&self) -> MonitoringHealth {
        let stats = self.stats();
        MonitoringHealth {
            enabled: self.enabled,
            running: self.is_running(),
            stats,
            success_rate: stats.success_rate(),
            tracked_alert_states: self.alerts.len(),
            max_concurrent_checks: self.max_concurrent,
            last_cycle: self.last_cycle(),
        }
    }
}

/// Run `cycle` until shutdown, sleeping `max(0, interval - elapsed)` between
/// cycles. A panicking cycle is logged and followed by `backoff`.
async fn drive_cycles<C, Fut>(
    interval: Duration,
    backoff: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut cycle: C,
) where
    C: FnMut() -> Fut,
    Fut: Future,
{
    loop {
        let started = Instant::now();
        let current = AssertUnwindSafe(cycle()).catch_unwind();

        let pause = tokio::select! {
            result = current => match result {
                Ok(_) => interval.saturating_sub(started.elapsed()),
                Err(_) => {
                    tracing::error!(backoff = ?backoff, "Error in monitoring loop, backing off");
                    backoff
                }
            },
            _ = shutdown.recv() => break,
        };

        tokio::select! {
            _ = time::sleep(pause) => {}
            _ = shutdown.recv() => break,
        }
    }
    tracing::debug!("Health monitor loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use chrono::TimeDelta;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn monitor() -> (Arc<InstanceStore>, HealthMonitor) {
        let store = Arc::new(InstanceStore::default());
        let monitor = HealthMonitor::new(Arc::clone(&store), &RegistryConfig::default());
        (store, monitor)
    }

    fn payload(status: &str, load: f64) -> Result<HealthPayload, ProbeError> {
        Ok(HealthPayload {
            status: status.to_string(),
            load_percentage: load,
        })
    }

    #[test]
    fn test_warning_tier_fires_once() {
        let (_, monitor) = monitor();
        let key = InstanceKey::new("test-service", "instance-1");

        assert_eq!(monitor.evaluate_load(&key, 0.65), Some(LoadTier::Warning));
        let stats = monitor.stats();
        assert_eq!(stats.warning_alerts, 1);
        assert_eq!(stats.critical_alerts, 0);
        assert_eq!(stats.emergency_alerts, 0);
    }

    #[test]
    fn test_emergency_tier_takes_priority() {
        let (_, monitor) = monitor();
        let key = InstanceKey::new("test-service", "instance-1");

        assert_eq!(monitor.evaluate_load(&key, 0.98), Some(LoadTier::Emergency));
        let stats = monitor.stats();
        assert_eq!(stats.emergency_alerts, 1);
        assert_eq!(stats.warning_alerts, 0);
        assert_eq!(stats.critical_alerts, 0);
    }

    #[test]
    fn test_below_warning_is_silent() {
        let (_, monitor) = monitor();
        let key = InstanceKey::new("svc", "a");
        assert_eq!(monitor.evaluate_load(&key, 0.3), None);
        assert!(monitor.alert_state(&key).is_none());
    }

    #[test]
    fn test_cooldown_is_shared_across_tiers() {
        let (_, monitor) = monitor();
        let key = InstanceKey::new("svc", "a");
        let t0 = Utc::now();

        assert_eq!(monitor.evaluate_load_at(&key, 0.65, t0), Some(LoadTier::Warning));
        assert_eq!(monitor.evaluate_load_at(&key, 0.9, t0 + TimeDelta::seconds(30)), None);
        assert_eq!(monitor.alert_state(&key).unwrap().alert_count, 1);
        assert_eq!(monitor.stats().critical_alerts, 0);

        let later = t0 + TimeDelta::seconds(300);
        assert_eq!(monitor.evaluate_load_at(&key, 0.9, later), Some(LoadTier::Critical));
        assert_eq!(monitor.alert_state(&key).unwrap().alert_count, 2);
    }

    #[test]
    fn test_valid_payload_updates_store() {
        let (store, monitor) = monitor();
        let instance = ServiceInstance::new("svc", "a", "localhost", 8080);
        store.register(instance.clone());

        let outcome = monitor.apply_result(&instance, payload("healthy", 0.4));
        assert_eq!(outcome.status, InstanceStatus::Healthy);
        assert_eq!(outcome.alert, None);

        let stored = store.get("svc", "a").unwrap();
        assert_eq!(stored.status, InstanceStatus::Healthy);
        assert_eq!(stored.load_percentage(), 0.4);
        assert!(stored.last_health_check.is_some());
        assert_eq!(monitor.stats().successful_checks, 1);
    }

    #[test]
    fn test_non_sentinel_status_is_unhealthy_but_evaluated() {
        let (store, monitor) = monitor();
        let instance = ServiceInstance::new("svc", "a", "localhost", 8080);
        store.register(instance.clone());

        let outcome = monitor.apply_result(&instance, payload("degraded", 0.85));
        assert_eq!(outcome.status, InstanceStatus::Unhealthy);
        assert_eq!(outcome.alert, Some(LoadTier::Critical));
        assert_eq!(store.get("svc", "a").unwrap().status, InstanceStatus::Unhealthy);
    }

    #[test]
    fn test_failure_marks_unhealthy_without_alert() {
        let (store, monitor) = monitor();
        let instance = ServiceInstance::new("svc", "a", "localhost", 8080);
        store.register(instance.clone());
        monitor.apply_result(&instance, payload("healthy", 0.5));

        let outcome =
            monitor.apply_result(&instance, Err(ProbeError::Status(StatusCode::SERVICE_UNAVAILABLE)));
        assert_eq!(outcome.status, InstanceStatus::Unhealthy);
        assert_eq!(outcome.alert, None);

        let stored = store.get("svc", "a").unwrap();
        assert_eq!(stored.status, InstanceStatus::Unhealthy);
        assert_eq!(stored.load_percentage(), 0.0);

        let stats = monitor.stats();
        assert_eq!(stats.total_checks, 2);
        assert_eq!(stats.failed_checks, 1);
        assert_eq!(monitor.alert_states().len(), 0);
    }

    #[test]
    fn test_unknown_instance_is_not_fabricated() {
        let (store, monitor) = monitor();
        let instance = ServiceInstance::new("ghost", "a", "localhost", 8080);

        monitor.apply_result(&instance, payload("healthy", 0.1));
        assert!(store.get("ghost", "a").is_none());
    }

    #[test]
    fn test_reset_clears_stats_and_alerts() {
        let (_, monitor) = monitor();
        let key = InstanceKey::new("svc", "a");
        monitor.evaluate_load(&key, 0.99);
        assert_eq!(monitor.monitoring_health().tracked_alert_states, 1);

        monitor.reset_stats();
        assert_eq!(monitor.stats(), StatsSnapshot::default());
        assert!(monitor.alert_states().is_empty());
        assert_eq!(monitor.evaluate_load(&key, 0.99), Some(LoadTier::Emergency));
    }

    #[tokio::test]
    async fn test_start_is_noop_when_disabled() {
        let store = Arc::new(InstanceStore::default());
        let mut config = RegistryConfig::default();
        config.monitoring.enabled = false;
        let monitor = Arc::new(HealthMonitor::new(store, &config));

        assert!(!monitor.start());
        assert!(!monitor.is_running());
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let (_, monitor) = monitor();
        let monitor = Arc::new(monitor);

        assert!(monitor.start());
        assert!(!monitor.start());
        assert!(monitor.is_running());

        monitor.stop().await;
        assert!(!monitor.is_running());
        monitor.stop().await;

        assert!(monitor.start());
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_empty_cycle_records_report() {
        let (_, monitor) = monitor();
        let report = monitor.run_cycle().await;
        assert_eq!(report.instances_checked, 0);
        assert_eq!(report.expired, 0);
        assert_eq!(monitor.last_cycle(), Some(report));
    }

    #[tokio::test]
    async fn test_panicking_check_counts_as_failure() {
        let (_, monitor) = monitor();
        let key = InstanceKey::new("svc", "a");

        let outcome = monitor
            .guard_check(&key, async { panic!("check exploded") })
            .await;
        assert!(outcome.is_none());

        let stats = monitor.stats();
        assert_eq!(stats.total_checks, 1);
        assert_eq!(stats.failed_checks, 1);
    }

    #[tokio::test]
    async fn test_loop_survives_panicking_cycle() {
        let calls = Arc::new(AtomicUsize::new(0));
        let shutdown = Shutdown::new();

        let counter = Arc::clone(&calls);
        let handle = tokio::spawn(drive_cycles(
            Duration::from_millis(5),
            Duration::from_millis(20),
            shutdown.subscribe(),
            move || {
                let call = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call == 0 {
                        panic!("cycle exploded");
                    }
                }
            },
        ));

        let deadline = Instant::now() + Duration::from_secs(2);
        while calls.load(Ordering::SeqCst) < 3 {
            assert!(Instant::now() < deadline, "loop stopped after a panicking cycle");
            time::sleep(Duration::from_millis(10)).await;
        }

        shutdown.trigger();
        handle.await.unwrap();
    }
}
