//! In-memory instance store.
//!
//! # Responsibilities
//! - Single source of truth for instance existence, liveness and health
//! - Upsert, remove, health and heartbeat updates keyed by `(service, instance)`
//! - Copy-out snapshots for readers
//! - TTL sweep of instances whose heartbeat went stale
//!
//! # Design Decisions
//! - One store-wide lock; held only for map operations, never across I/O
//! - Empty service groups are pruned as soon as their last instance leaves
//! - Absent keys are reported as `false`, never as errors

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;

use crate::observability::metrics;
use crate::registry::instance::{InstanceStatus, ServiceInstance};
use crate::registry::topics;

type ServiceGroups = BTreeMap<String, BTreeMap<String, ServiceInstance>>;

/// Concurrency-safe `service_name -> instance_id -> instance` map.
#[derive(Debug, Default)]
pub struct InstanceStore {
    services: Mutex<ServiceGroups>,
}

impl InstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the record at `(service_name, instance_id)`.
    pub fn register(&self, instance: ServiceInstance) -> bool {
        let service_name = instance.service_name.clone();
        let instance_id = instance.instance_id.clone();
        let address = instance.address();

        let replaced = {
            let mut services = self.services.lock();
            services
                .entry(service_name.clone())
                .or_default()
                .insert(instance_id.clone(), instance)
                .is_some()
        };

        metrics::record_registration();
        tracing::info!(
            service = %service_name,
            instance = %instance_id,
            address = %address,
            replaced,
            "Registered service instance"
        );
        true
    }

    /// Remove a record. Returns false if the key did not exist.
    pub fn unregister(&self, service_name: &str, instance_id: &str) -> bool {
        let removed = {
            let mut services = self.services.lock();
            remove_instance(&mut services, service_name, instance_id)
        };

        if removed {
            tracing::info!(service = %service_name, instance = %instance_id, "Unregistered service instance");
        }
        removed
    }

    /// Record a probe result. Returns false if the key is absent.
    pub fn update_health(
        &self,
        service_name: &str,
        instance_id: &str,
        status: InstanceStatus,
        load_percentage: f64,
    ) -> bool {
        let mut services = self.services.lock();
        match lookup_mut(&mut services, service_name, instance_id) {
            Some(instance) => {
                instance.status = status;
                instance.last_health_check = Some(Utc::now());
                instance.set_load_percentage(load_percentage);
                true
            }
            None => false,
        }
    }

    /// Refresh the heartbeat timestamp. Returns false if the key is absent.
    pub fn update_heartbeat(&self, service_name: &str, instance_id: &str) -> bool {
        let mut services = self.services.lock();
        match lookup_mut(&mut services, service_name, instance_id) {
            Some(instance) => {
                instance.last_heartbeat = Some(Utc::now());
                true
            }
            None => false,
        }
    }

    pub fn get(&self, service_name: &str, instance_id: &str) -> Option<ServiceInstance> {
        let services = self.services.lock();
        services
            .get(service_name)
            .and_then(|group| group.get(instance_id))
            .cloned()
    }

    /// All instances of a service, ordered by instance id.
    pub fn get_instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        let services = self.services.lock();
        services
            .get(service_name)
            .map(|group| group.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Instances of a service whose last probe reported healthy.
    pub fn get_healthy_instances(&self, service_name: &str) -> Vec<ServiceInstance> {
        let services = self.services.lock();
        services
            .get(service_name)
            .map(|group| {
                group
                    .values()
                    .filter(|instance| instance.is_healthy())
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn get_all(&self) -> BTreeMap<String, Vec<ServiceInstance>> {
        let services = self.services.lock();
        services
            .iter()
            .map(|(name, group)| (name.clone(), group.values().cloned().collect()))
            .collect()
    }

    /// Flat copy of every instance, for the monitor's per-cycle snapshot.
    pub fn snapshot(&self) -> Vec<ServiceInstance> {
        let services = self.services.lock();
        services
            .values()
            .flat_map(|group| group.values().cloned())
            .collect()
    }

    pub fn instance_count(&self) -> usize {
        let services = self.services.lock();
        services.values().map(|group| group.len()).sum()
    }

    /// Remove every instance whose last heartbeat is older than `ttl`.
    pub fn sweep_expired(&self, ttl: Duration) -> usize {
        self.sweep_expired_at(ttl, Utc::now())
    }

    /// Sweep against an explicit clock reading.
    ///
    /// Instances that never sent a heartbeat are left alone.
    pub fn sweep_expired_at(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let ttl = TimeDelta::from_std(ttl).unwrap_or(TimeDelta::MAX);
        let mut expired = Vec::new();

        {
            let mut services = self.services.lock();
            for (service_name, group) in services.iter_mut() {
                group.retain(|instance_id, instance| {
                    let stale = instance
                        .last_heartbeat
                        .is_some_and(|seen| now.signed_duration_since(seen) > ttl);
                    if stale {
                        expired.push((service_name.clone(), instance_id.clone()));
                    }
                    !stale
                });
            }
            services.retain(|_, group| !group.is_empty());
        }

        for (service_name, instance_id) in &expired {
            tracing::warn!(service = %service_name, instance = %instance_id, "Removed expired service instance");
        }
        if !expired.is_empty() {
            metrics::record_expired(expired.len());
        }
        expired.len()
    }

    /// `topic -> subscribing services`, recomputed per call.
    pub fn topic_map(&self) -> BTreeMap<String, Vec<String>> {
        let services = self.services.lock();
        topics::build_topic_map(services.values().flat_map(|group| group.values()))
    }

    pub fn services_for_topic(&self, topic: &str) -> Vec<String> {
        let services = self.services.lock();
        topics::subscribers_of(services.values().flat_map(|group| group.values()), topic)
    }
}

fn lookup_mut<'a>(
    services: &'a mut ServiceGroups,
    service_name: &str,
    instance_id: &str,
) -> Option<&'a mut ServiceInstance> {
    services
        .get_mut(service_name)
        .and_then(|group| group.get_mut(instance_id))
}

fn remove_instance(services: &mut ServiceGroups, service_name: &str, instance_id: &str) -> bool {
    let Some(group) = services.get_mut(service_name) else {
        return false;
    };
    let removed = group.remove(instance_id).is_some();
    if group.is_empty() {
        services.remove(service_name);
    }
    removed
}
