//! Metrics collection and exposition.
//!
//! # Metrics
//! - `registry_registrations_total` (counter)
//! - `registry_expired_instances_total` (counter): removed by the TTL sweep
//! - `registry_health_checks_total` (counter): by `outcome` (success, failure)
//! - `registry_load_alerts_total` (counter): by `tier`
//! - `registry_monitor_cycle_duration_seconds` (histogram)
//! - `registry_instance_load` (gauge): by `service`, `instance`
//! - `registry_instance_healthy` (gauge): 1=healthy, 0=otherwise
//! - `registry_service_instances` (gauge): by `service`
//!
//! The Prometheus recorder is process-wide and installed at most once.
//! Registry gauges are rebuilt from a store snapshot at scrape time; label
//! sets that left the store since the previous scrape are zeroed.

use std::collections::BTreeSet;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use parking_lot::{const_mutex, Mutex};

use crate::health::alerts::LoadTier;
use crate::registry::{InstanceStatus, ServiceInstance};

static HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

static REGISTRY_GAUGES: RegistryGauges = RegistryGauges::new();

/// Install the Prometheus recorder, or return the already installed handle.
///
/// Returns `None` if another global recorder was installed first.
pub fn init_metrics() -> Option<PrometheusHandle> {
    HANDLE
        .get_or_init(|| match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                describe();
                Some(handle)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install Prometheus recorder");
                None
            }
        })
        .clone()
}

/// Handle of the installed recorder, if any.
pub fn handle() -> Option<PrometheusHandle> {
    HANDLE.get().and_then(|handle| handle.clone())
}

fn describe() {
    describe_counter!("registry_registrations_total", "Instance registrations, including re-registrations");
    describe_counter!("registry_expired_instances_total", "Instances removed by the TTL sweep");
    describe_counter!("registry_health_checks_total", "Completed health checks by outcome");
    describe_counter!("registry_load_alerts_total", "Fired load alerts by tier");
    describe_histogram!("registry_monitor_cycle_duration_seconds", "Duration of a full monitoring cycle");
    describe_gauge!("registry_instance_load", "Last reported load percentage per instance");
    describe_gauge!("registry_instance_healthy", "1 if the instance is healthy, 0 otherwise");
    describe_gauge!("registry_service_instances", "Registered instances per service");
}

pub fn record_registration() {
    counter!("registry_registrations_total").increment(1);
}

pub fn record_expired(count: usize) {
    counter!("registry_expired_instances_total").increment(count as u64);
}

pub fn record_check(success: bool) {
    let outcome = if success { "success" } else { "failure" };
    counter!("registry_health_checks_total", "outcome" => outcome).increment(1);
}

pub fn record_alert(tier: LoadTier) {
    counter!("registry_load_alerts_total", "tier" => tier.as_str()).increment(1);
}

pub fn record_cycle_duration(duration: Duration) {
    histogram!("registry_monitor_cycle_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_instance_health(service: &str, instance: &str, status: InstanceStatus, load: f64) {
    let healthy = if status == InstanceStatus::Healthy { 1.0 } else { 0.0 };
    gauge!(
        "registry_instance_load",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(load);
    gauge!(
        "registry_instance_healthy",
        "service" => service.to_string(),
        "instance" => instance.to_string()
    )
    .set(healthy);
}

pub fn record_service_instances(service: &str, count: usize) {
    gauge!("registry_service_instances", "service" => service.to_string()).set(count as f64);
}

/// Refresh registry gauges from a store snapshot, grouped by service.
pub fn refresh_registry_gauges<'a, I>(services: I)
where
    I: IntoIterator<Item = (&'a String, &'a Vec<ServiceInstance>)>,
{
    REGISTRY_GAUGES.refresh(services);
}

#[derive(Debug)]
struct PublishedKeys {
    services: BTreeSet<String>,
    instances: BTreeSet<(String, String)>,
}

/// Registry gauges and the label sets published at the previous refresh.
#[derive(Debug)]
pub struct RegistryGauges {
    published: Mutex<PublishedKeys>,
}

impl RegistryGauges {
    pub const fn new() -> Self {
        Self {
            published: const_mutex(PublishedKeys {
                services: BTreeSet::new(),
                instances: BTreeSet::new(),
            }),
        }
    }

    /// Publish the snapshot and zero every label set absent from it.
    pub fn refresh<'a, I>(&self, services: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<ServiceInstance>)>,
    {
        let mut current = PublishedKeys {
            services: BTreeSet::new(),
            instances: BTreeSet::new(),
        };

        for (service, instances) in services {
            record_service_instances(service, instances.len());
            current.services.insert(service.clone());
            for instance in instances {
                record_instance_health(
                    service,
                    &instance.instance_id,
                    instance.status,
                    instance.load_percentage(),
                );
                current
                    .instances
                    .insert((service.clone(), instance.instance_id.clone()));
            }
        }

        let mut published = self.published.lock();
        for service in published.services.difference(&current.services) {
            record_service_instances(service, 0);
        }
        for (service, instance) in published.instances.difference(&current.instances) {
            record_instance_health(service, instance, InstanceStatus::Unknown, 0.0);
        }
        *published = current;
    }
}

impl Default for RegistryGauges {
    fn default() -> Self {
        Self::new()
    }
}
