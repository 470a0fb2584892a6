//! Active health probing of a single instance.
//!
//! # Responsibilities
//! - Issue `GET http://{host}:{port}{health_endpoint}` with a deadline
//! - Retry transport errors and timeouts per the retry policy
//! - Validate the health payload (`status` string, `load_percentage` in [0, 1])
//!
//! # Design Decisions
//! - A non-2xx answer or a malformed payload is an answer, not a transport
//!   failure, so it is never retried
//! - The offending payload is carried in the error for diagnosis

use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use futures_util::StreamExt;
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};
use serde_json::Value;
use tokio::time;
use url::Url;

use crate::registry::ServiceInstance;
use crate::resilience::RetryPolicy;

/// Largest health payload read from an instance.
const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

/// Characters of an invalid payload kept for logging.
const PAYLOAD_LOG_LIMIT: usize = 256;

/// Required fields of a health payload.
pub const REQUIRED_FIELDS: [&str; 2] = ["status", "load_percentage"];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProbeError {
    #[error("health check timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection error: {0}")]
    Transport(String),

    #[error("non-success status {0}")]
    Status(StatusCode),

    #[error("invalid health payload: {reason}")]
    InvalidPayload { reason: String, body: String },

    #[error("invalid probe url: {0}")]
    InvalidUrl(String),
}

impl ProbeError {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProbeError::Timeout(_) | ProbeError::Transport(_))
    }

    fn invalid(reason: impl Into<String>, body: &[u8]) -> Self {
        let body: String = String::from_utf8_lossy(body)
            .chars()
            .take(PAYLOAD_LOG_LIMIT)
            .collect();
        ProbeError::InvalidPayload {
            reason: reason.into(),
            body,
        }
    }
}

/// A validated health payload.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthPayload {
    pub status: String,
    pub load_percentage: f64,
}

/// Parse and validate a health payload body.
pub fn validate_payload(body: &[u8]) -> Result<HealthPayload, ProbeError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| ProbeError::invalid(format!("not JSON: {}", e), body))?;
    let Some(fields) = value.as_object() else {
        return Err(ProbeError::invalid("payload is not a JSON object", body));
    };

    let missing: Vec<_> = REQUIRED_FIELDS
        .iter()
        .filter(|field| !fields.contains_key(**field))
        .copied()
        .collect();
    if !missing.is_empty() {
        return Err(ProbeError::invalid(
            format!("missing required fields: {}", missing.join(", ")),
            body,
        ));
    }

    let Some(status) = fields["status"].as_str() else {
        return Err(ProbeError::invalid("status is not a string", body));
    };
    let Some(load_percentage) = fields["load_percentage"].as_f64() else {
        return Err(ProbeError::invalid("load_percentage is not a number", body));
    };
    if !(0.0..=1.0).contains(&load_percentage) {
        return Err(ProbeError::invalid(
            format!("load_percentage {} is outside [0, 1]", load_percentage),
            body,
        ));
    }

    Ok(HealthPayload {
        status: status.to_string(),
        load_percentage,
    })
}

/// Health endpoint URL for an instance.
pub fn probe_url(instance: &ServiceInstance) -> Result<Url, ProbeError> {
    let raw = format!(
        "http://{}:{}{}",
        instance.host, instance.port, instance.health_endpoint
    );
    Url::parse(&raw).map_err(|e| ProbeError::InvalidUrl(format!("{}: {}", raw, e)))
}

/// HTTP prober shared by every probe of the monitor.
#[derive(Debug, Clone)]
pub struct Prober {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl Prober {
    pub fn new(timeout: Duration, retry: RetryPolicy) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());

        Self {
            client,
            timeout,
            retry,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Probe an instance, retrying transport failures.
    pub async fn probe(&self, instance: &ServiceInstance) -> Result<HealthPayload, ProbeError> {
        let url = probe_url(instance)?;

        self.retry
            .run(
                |attempt| {
                    tracing::trace!(
                        service = %instance.service_name,
                        instance = %instance.instance_id,
                        url = %url,
                        attempt,
                        "Probing instance"
                    );
                    self.attempt(&url)
                },
                ProbeError::is_retryable,
            )
            .await
    }

    async fn attempt(&self, url: &Url) -> Result<HealthPayload, ProbeError> {
        let request = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("user-agent", "service-registry-health-check")
            .header("accept", "application/json")
            .body(Body::empty())
            .map_err(|e| ProbeError::InvalidUrl(e.to_string()))?;

        let exchange = async {
            let response = self
                .client
                .request(request)
                .await
                .map_err(|e| ProbeError::Transport(e.to_string()))?;
            let status = response.status();
            let body = read_payload(Body::new(response.into_body())).await?;
            Ok::<_, ProbeError>((status, body))
        };

        let (status, body) = match time::timeout(self.timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => return Err(ProbeError::Timeout(self.timeout)),
        };

        if !status.is_success() {
            return Err(ProbeError::Status(status));
        }
        validate_payload(&body)
    }
}

/// Read a response body of at most `MAX_PAYLOAD_BYTES`.
///
/// An oversized body is a bad answer, not a transport failure.
async fn read_payload(body: Body) -> Result<Vec<u8>, ProbeError> {
    let mut stream = body.into_data_stream();
    let mut payload = Vec::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| ProbeError::Transport(e.to_string()))?;
        if payload.len() + chunk.len() > MAX_PAYLOAD_BYTES {
            let head = if payload.is_empty() { &chunk[..] } else { &payload[..] };
            return Err(ProbeError::invalid(
                format!("payload exceeds {} bytes", MAX_PAYLOAD_BYTES),
                head,
            ));
        }
        payload.extend_from_slice(&chunk);
    }
    Ok(payload)
}
