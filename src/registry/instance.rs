//! Service instance record.
//!
//! # Responsibilities
//! - Represent one running process of a named service
//! - Own its network coordinates, health state and liveness timestamps
//! - Keep `load_percentage` inside [0, 1] on every write

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Default path probed when a registration does not name one.
pub const DEFAULT_HEALTH_ENDPOINT: &str = "/health";

/// Health state of an instance.
///
/// Every instance starts as `Unknown` and only leaves it once a probe completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceStatus::Healthy => "healthy",
            InstanceStatus::Unhealthy => "unhealthy",
            InstanceStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Composite identity of an instance: `(service_name, instance_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub service_name: String,
    pub instance_id: String,
}

impl InstanceKey {
    pub fn new(service_name: impl Into<String>, instance_id: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
        }
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service_name, self.instance_id)
    }
}

/// One registered instance of a service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub service_name: String,
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    /// Optional gRPC listener port, additive to `port`.
    pub grpc_port: Option<u16>,
    /// Externally reachable base URL (`http://{host}:{port}` unless given).
    pub instance_url: String,
    /// Path probed by the health monitor; always starts with `/`.
    pub health_endpoint: String,
    pub status: InstanceStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
    #[serde(deserialize_with = "deserialize_load")]
    load_percentage: f64,
    pub metadata: BTreeMap<String, String>,
    /// Event topics this instance consumes, in registration order.
    pub topics: Vec<String>,
    pub registered_at: DateTime<Utc>,
}

impl ServiceInstance {
    /// Create a fresh instance in the `Unknown` state.
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        let host = host.into();
        let instance_url = default_instance_url(&host, port);
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            host,
            port,
            grpc_port: None,
            instance_url,
            health_endpoint: DEFAULT_HEALTH_ENDPOINT.to_string(),
            status: InstanceStatus::Unknown,
            last_health_check: None,
            last_heartbeat: None,
            load_percentage: 0.0,
            metadata: BTreeMap::new(),
            topics: Vec::new(),
            registered_at: Utc::now(),
        }
    }

    pub fn with_health_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.health_endpoint = endpoint.into();
        self
    }

    pub fn with_grpc_port(mut self, grpc_port: Option<u16>) -> Self {
        self.grpc_port = grpc_port;
        self
    }

    /// Override the derived instance URL. `None` keeps the default.
    pub fn with_instance_url(mut self, url: Option<String>) -> Self {
        if let Some(url) = url {
            self.instance_url = url;
        }
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_topics(mut self, topics: Vec<String>) -> Self {
        self.topics = topics;
        self
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(&self.service_name, &self.instance_id)
    }

    pub fn load_percentage(&self) -> f64 {
        self.load_percentage
    }

    /// Store a load value, clamped into [0, 1]. NaN is stored as 0.
    pub fn set_load_percentage(&mut self, load: f64) {
        self.load_percentage = clamp_load(load);
    }

    pub fn is_healthy(&self) -> bool {
        self.status == InstanceStatus::Healthy
    }

    /// Host and port in `host:port` form, as used for scrape targets.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

pub fn default_instance_url(host: &str, port: u16) -> String {
    format!("http://{}:{}", host, port)
}

pub(crate) fn clamp_load(load: f64) -> f64 {
    if load.is_nan() {
        0.0
    } else {
        load.clamp(0.0, 1.0)
    }
}

fn deserialize_load<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(clamp_load)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_defaults() {
        let instance = ServiceInstance::new("billing-service", "billing-1", "localhost", 8080);
        assert_eq!(instance.status, InstanceStatus::Unknown);
        assert_eq!(instance.instance_url, "http://localhost:8080");
        assert_eq!(instance.health_endpoint, "/health");
        assert!(instance.last_heartbeat.is_none());
        assert!(instance.last_health_check.is_none());
        assert!(instance.topics.is_empty());
        assert_eq!(instance.grpc_port, None);
    }

    #[test]
    fn test_explicit_instance_url_wins() {
        let instance = ServiceInstance::new("game", "g-1", "localhost", 8080)
            .with_instance_url(Some("https://custom-domain.com:9000".into()));
        assert_eq!(instance.instance_url, "https://custom-domain.com:9000");

        let derived = ServiceInstance::new("game", "g-1", "game-service.local", 9000)
            .with_instance_url(None);
        assert_eq!(derived.instance_url, "http://game-service.local:9000");
    }

    #[test]
    fn test_load_is_clamped() {
        let mut instance = ServiceInstance::new("svc", "i-1", "localhost", 8000);
        instance.set_load_percentage(1.7);
        assert_eq!(instance.load_percentage(), 1.0);
        instance.set_load_percentage(-0.2);
        assert_eq!(instance.load_percentage(), 0.0);
        instance.set_load_percentage(f64::NAN);
        assert_eq!(instance.load_percentage(), 0.0);
        instance.set_load_percentage(0.42);
        assert_eq!(instance.load_percentage(), 0.42);
    }

    #[test]
    fn test_deserialized_load_is_clamped() {
        let mut value = serde_json::to_value(ServiceInstance::new("svc", "i-1", "localhost", 8000)).unwrap();
        value["load_percentage"] = serde_json::json!(1.7);
        let instance: ServiceInstance = serde_json::from_value(value.clone()).unwrap();
        assert_eq!(instance.load_percentage(), 1.0);

        value["load_percentage"] = serde_json::json!(-3.0);
        let instance: ServiceInstance = serde_json::from_value(value).unwrap();
        assert_eq!(instance.load_percentage(), 0.0);
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&InstanceStatus::Healthy).unwrap();
        assert_eq!(json, "\"healthy\"");
        assert_eq!(InstanceStatus::default(), InstanceStatus::Unknown);
    }

    #[test]
    fn test_key_display() {
        let key = InstanceKey::new("billing-service", "billing-1");
        assert_eq!(key.to_string(), "billing-service:billing-1");
    }
}
