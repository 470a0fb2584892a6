use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use url::Url;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

const DEFAULT_URL: &str = "http://service-discovery:3004";
const DEFAULT_SECRET: &str = "service-discovery-secret-change-me";

/// Pause before the next heartbeat after a transport error.
const HEARTBEAT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Registration payload for one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registration {
    pub service_name: String,
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grpc_port: Option<u16>,
    pub health_endpoint: String,
    pub metadata: BTreeMap<String, String>,
    pub topics: Vec<String>,
}

impl Registration {
    pub fn new(
        service_name: impl Into<String>,
        instance_id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
    ) -> Self {
        Self {
            service_name: service_name.into(),
            instance_id: instance_id.into(),
            host: host.into(),
            port,
            instance_url: None,
            grpc_port: None,
            health_endpoint: "/health".to_string(),
            metadata: BTreeMap::new(),
            topics: Vec::new(),
        }
    }

    pub fn with_health_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.health_endpoint = endpoint.into();
        self
    }

    pub fn with_instance_url(mut self, url: impl Into<String>) -> Self {
        self.instance_url = Some(url.into());
        self
    }

    pub fn with_grpc_port(mut self, port: u16) -> Self {
        self.grpc_port = Some(port);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics.into_iter().map(Into::into).collect();
        self
    }
}

/// An instance as reported by the registry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InstanceRecord {
    pub service_name: String,
    pub instance_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub grpc_port: Option<u16>,
    #[serde(default)]
    pub instance_url: String,
    pub health_endpoint: String,
    pub status: String,
    #[serde(default)]
    pub last_health_check: Option<String>,
    #[serde(default)]
    pub last_heartbeat: Option<String>,
    pub load_percentage: f64,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub registered_at: String,
}

impl InstanceRecord {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[derive(Deserialize)]
struct ActionResponse {
    success: bool,
    message: String,
    #[serde(default)]
    heartbeat_interval_secs: Option<u64>,
}

struct Inner {
    client: Client,
    base_url: String,
    authorization: String,
    registered: Mutex<Option<Registration>>,
}

struct HeartbeatTask {
    stop: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

/// Registry client holding at most one registration.
pub struct RegistryClient {
    inner: Arc<Inner>,
    heartbeat: Mutex<Option<HeartbeatTask>>,
}

impl RegistryClient {
    pub fn new(registry_url: &str, secret: &str) -> Self {
        Self {
            inner: Arc::new(Inner {
                client: Client::new(),
                base_url: format!("{}/v1/discovery", registry_url.trim_end_matches('/')),
                authorization: format!("Bearer {}", secret),
                registered: Mutex::new(None),
            }),
            heartbeat: Mutex::new(None),
        }
    }

    /// Build from `SERVICE_DISCOVERY_URL` and `SERVICE_DISCOVERY_SECRET`.
    pub fn from_env() -> Self {
        let url = std::env::var("SERVICE_DISCOVERY_URL").unwrap_or_else(|_| DEFAULT_URL.to_string());
        let secret =
            std::env::var("SERVICE_DISCOVERY_SECRET").unwrap_or_else(|_| DEFAULT_SECRET.to_string());
        Self::new(&url, &secret)
    }

    /// Register an instance and remember it for heartbeats and unregistration.
    ///
    /// Returns the heartbeat interval advertised by the registry, if any.
    pub async fn register(&self, registration: Registration) -> Result<Option<Duration>> {
        let resp = self
            .inner
            .client
            .post(self.inner.endpoint(&["register"])?)
            .header("Authorization", &self.inner.authorization)
            .json(&registration)
            .send()
            .await?;

        let result: ActionResponse = expect_success(resp).await?.json().await?;
        if !result.success {
            return Err(format!("Registration failed: {}", result.message).into());
        }

        tracing::info!(
            service = %registration.service_name,
            instance = %registration.instance_id,
            "Registered with service registry"
        );
        *self.inner.registered.lock().await = Some(registration);
        Ok(result.heartbeat_interval_secs.map(Duration::from_secs))
    }

    /// Send one heartbeat. `Ok(false)` means the registry no longer knows
    /// this instance.
    pub async fn send_heartbeat(&self) -> Result<bool> {
        self.inner.send_heartbeat().await
    }

    /// Start a background heartbeat loop. Returns `false` if one is running.
    pub async fn start_heartbeat(&self, interval: Duration) -> bool {
        let mut heartbeat = self.heartbeat.lock().await;
        if heartbeat.is_some() {
            tracing::warn!("Heartbeat loop already running");
            return false;
        }

        let (stop, mut stopped) = oneshot::channel();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            loop {
                let pause = match inner.send_heartbeat().await {
                    Ok(true) => interval,
                    Ok(false) => {
                        tracing::warn!("Heartbeat rejected: instance not registered");
                        interval
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Error sending heartbeat");
                        HEARTBEAT_RETRY_DELAY
                    }
                };
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = &mut stopped => break,
                }
            }
        });

        *heartbeat = Some(HeartbeatTask { stop, handle });
        tracing::info!(interval = ?interval, "Heartbeat loop started");
        true
    }

    /// Stop the heartbeat loop and wait for it to exit.
    pub async fn stop_heartbeat(&self) {
        let Some(task) = self.heartbeat.lock().await.take() else {
            return;
        };
        let _ = task.stop.send(());
        let _ = task.handle.await;
        tracing::info!("Heartbeat loop stopped");
    }

    /// Unregister the remembered instance. `Ok(false)` if the registry did
    /// not know it.
    pub async fn unregister(&self) -> Result<bool> {
        let Some(registration) = self.inner.registered.lock().await.clone() else {
            return Err("No registered instance to unregister".into());
        };

        let resp = self
            .inner
            .client
            .delete(self.inner.endpoint(&[
                "unregister",
                &registration.service_name,
                &registration.instance_id,
            ])?)
            .header("Authorization", &self.inner.authorization)
            .send()
            .await?;

        let known = resp.status() != StatusCode::NOT_FOUND;
        if known {
            expect_success(resp).await?;
        }
        *self.inner.registered.lock().await = None;
        Ok(known)
    }

    /// Instances of one service. An unknown service yields an empty list.
    pub async fn discover(&self, service_name: &str, healthy_only: bool) -> Result<Vec<InstanceRecord>> {
        let resp = if healthy_only {
            self.get(&["services", service_name, "healthy"]).await?
        } else {
            self.get(&["services", service_name]).await?
        };
        let field = if healthy_only { "healthy_instances" } else { "instances" };

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        let mut body: Value = expect_success(resp).await?.json().await?;
        Ok(serde_json::from_value(body[field].take())?)
    }

    pub async fn list_all(&self) -> Result<BTreeMap<String, Vec<InstanceRecord>>> {
        let mut body: Value = expect_success(self.get(&["services"]).await?).await?.json().await?;
        Ok(serde_json::from_value(body["services"].take())?)
    }

    /// Topic to subscribing services.
    pub async fn topics(&self) -> Result<BTreeMap<String, Vec<String>>> {
        #[derive(Deserialize)]
        struct Entry {
            topic: String,
            services: Vec<String>,
        }
        #[derive(Deserialize)]
        struct Topics {
            topics: Vec<Entry>,
        }

        let body: Topics = expect_success(self.get(&["services", "topics"]).await?).await?.json().await?;
        Ok(body
            .topics
            .into_iter()
            .map(|entry| (entry.topic, entry.services))
            .collect())
    }

    pub async fn services_for_topic(&self, topic: &str) -> Result<Vec<String>> {
        let mut body: Value = expect_success(self.get(&["topics", topic]).await?)
            .await?
            .json()
            .await?;
        Ok(serde_json::from_value(body["services"].take())?)
    }

    pub async fn registration(&self) -> Option<Registration> {
        self.inner.registered.lock().await.clone()
    }

    async fn get(&self, segments: &[&str]) -> Result<Response> {
        Ok(self
            .inner
            .client
            .get(self.inner.endpoint(segments)?)
            .send()
            .await?)
    }
}

impl Inner {
    /// API URL with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)?;
        url.path_segments_mut()
            .map_err(|_| "Registry URL cannot carry a path")?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn send_heartbeat(&self) -> Result<bool> {
        let Some(registration) = self.registered.lock().await.clone() else {
            return Err("No registered instance to send a heartbeat for".into());
        };

        let resp = self
            .client
            .post(self.endpoint(&["heartbeat"])?)
            .header("Authorization", &self.authorization)
            .json(&serde_json::json!({
                "service_name": registration.service_name,
                "instance_id": registration.instance_id,
            }))
            .send()
            .await?;

        let result: ActionResponse = expect_success(resp).await?.json().await?;
        if result.success {
            tracing::debug!(
                service = %registration.service_name,
                instance = %registration.instance_id,
                "Heartbeat sent"
            );
        }
        Ok(result.success)
    }
}

async fn expect_success(resp: Response) -> Result<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let text = resp.text().await.unwrap_or_default();
    Err(format!("Registry returned error status {}: {}", status, text).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_serializes_without_empty_options() {
        let registration = Registration::new("billing-service", "billing-1", "localhost", 8080)
            .with_topics(["order.created"])
            .with_metadata("region", "eu");

        let value = serde_json::to_value(&registration).unwrap();
        assert_eq!(value["health_endpoint"], "/health");
        assert_eq!(value["topics"], serde_json::json!(["order.created"]));
        assert_eq!(value["metadata"]["region"], "eu");
        assert!(value.get("grpc_port").is_none());
        assert!(value.get("instance_url").is_none());
    }

    #[test]
    fn test_base_url_normalized() {
        let client = RegistryClient::new("http://localhost:3004/", "secret");
        assert_eq!(client.inner.base_url, "http://localhost:3004/v1/discovery");
        assert_eq!(client.inner.authorization, "Bearer secret");
    }

    #[test]
    fn test_path_segments_are_encoded() {
        let client = RegistryClient::new("http://localhost:3004", "secret");
        let url = client
            .inner
            .endpoint(&["unregister", "billing/eu", "b-1?x#y"])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:3004/v1/discovery/unregister/billing%2Feu/b-1%3Fx%23y"
        );
        assert_eq!(
            client.inner.endpoint(&["topics", "order created"]).unwrap().as_str(),
            "http://localhost:3004/v1/discovery/topics/order%20created"
        );
    }

    #[tokio::test]
    async fn test_heartbeat_requires_registration() {
        let client = RegistryClient::new("http://127.0.0.1:9", "secret");
        assert!(client.send_heartbeat().await.is_err());
        assert!(client.unregister().await.is_err());
    }
}
