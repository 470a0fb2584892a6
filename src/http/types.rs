//! Request and response bodies of the discovery API.
//!
//! Registration input is validated here, at the transport boundary; the store
//! itself accepts whatever it is given.

use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::health::alerts::AlertState;
use crate::health::stats::StatsSnapshot;
use crate::registry::{ServiceInstance, DEFAULT_HEALTH_ENDPOINT};

const MAX_NAME_LEN: usize = 100;

fn default_health_endpoint() -> String {
    DEFAULT_HEALTH_ENDPOINT.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    pub service_name: String,
    pub instance_id: String,
    pub host: String,
    /// Wider than `u16` so an out-of-range port is a validation error, not a
    /// parse error.
    pub port: u32,
    #[serde(default)]
    pub instance_url: Option<String>,
    #[serde(default)]
    pub grpc_port: Option<u32>,
    #[serde(default = "default_health_endpoint")]
    pub health_endpoint: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

impl RegisterRequest {
    /// Validate and convert into a fresh instance record.
    pub fn into_instance(self) -> Result<ServiceInstance, ApiError> {
        check_name("service_name", &self.service_name)?;
        check_name("instance_id", &self.instance_id)?;
        if self.host.trim().is_empty() {
            return Err(ApiError::Validation("host must not be empty".to_string()));
        }
        let port = check_port("port", self.port)?;
        let grpc_port = self
            .grpc_port
            .map(|p| check_port("grpc_port", p))
            .transpose()?;
        if !self.health_endpoint.starts_with('/') {
            return Err(ApiError::Validation(
                "health_endpoint must start with '/'".to_string(),
            ));
        }
        if let Some(url) = &self.instance_url {
            Url::parse(url).map_err(|e| {
                ApiError::Validation(format!("instance_url '{}' is invalid: {}", url, e))
            })?;
        }

        Ok(
            ServiceInstance::new(self.service_name, self.instance_id, self.host, port)
                .with_health_endpoint(self.health_endpoint)
                .with_grpc_port(grpc_port)
                .with_instance_url(self.instance_url)
                .with_metadata(self.metadata)
                .with_topics(self.topics),
        )
    }
}

fn check_name(field: &str, value: &str) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len == 0 || len > MAX_NAME_LEN {
        return Err(ApiError::Validation(format!(
            "{} must be between 1 and {} characters",
            field, MAX_NAME_LEN
        )));
    }
    Ok(())
}

fn check_port(field: &str, port: u32) -> Result<u16, ApiError> {
    match u16::try_from(port) {
        Ok(port) if port > 0 => Ok(port),
        _ => Err(ApiError::Validation(format!(
            "{} must be between 1 and 65535, got {}",
            field, port
        ))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub service_name: String,
    pub instance_id: String,
}

/// Outcome of a mutating call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_interval_secs: Option<u64>,
}

impl ActionResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            heartbeat_interval_secs: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            heartbeat_interval_secs: None,
        }
    }

    pub fn with_heartbeat_interval(mut self, secs: u64) -> Self {
        self.heartbeat_interval_secs = Some(secs);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceListResponse {
    pub services: BTreeMap<String, Vec<ServiceInstance>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceInstancesResponse {
    pub service_name: String,
    pub instances: Vec<ServiceInstance>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthyInstancesResponse {
    pub service_name: String,
    pub healthy_instances: Vec<ServiceInstance>,
}

/// One entry of a Prometheus HTTP service discovery response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrometheusTarget {
    pub targets: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

impl From<&ServiceInstance> for PrometheusTarget {
    fn from(instance: &ServiceInstance) -> Self {
        let mut labels = BTreeMap::from([
            ("instance".to_string(), instance.instance_id.clone()),
            ("service_name".to_string(), instance.service_name.clone()),
            ("status".to_string(), instance.status.to_string()),
            (
                "load_percentage".to_string(),
                format!("{:?}", instance.load_percentage()),
            ),
        ]);
        labels.extend(instance.metadata.clone());

        Self {
            targets: vec![instance.address()],
            labels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicEntry {
    pub topic: String,
    pub services: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicsResponse {
    pub topics: Vec<TopicEntry>,
}

impl From<BTreeMap<String, Vec<String>>> for TopicsResponse {
    fn from(map: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            topics: map
                .into_iter()
                .map(|(topic, services)| TopicEntry { topic, services })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitoringStatsResponse {
    #[serde(flatten)]
    pub stats: StatsSnapshot,
    pub success_rate: f64,
    pub alert_states: Vec<AlertState>,
}

/// Errors returned by API handlers.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unavailable(&'static str),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(serde_json::json!({ "detail": self.to_string() }))).into_response()
    }
}
