//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with every discovery handler
//! - Guard mutating routes with the shared-secret middleware
//! - Wire up middleware (tracing, request timeout)
//! - Serve on a listener until the shutdown signal fires

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::RegistryConfig;
use crate::health::HealthMonitor;
use crate::http::{auth, handlers};
use crate::registry::InstanceStore;

/// Prefix of every discovery route.
pub const API_PREFIX: &str = "/v1/discovery";

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<InstanceStore>,
    pub monitor: Arc<HealthMonitor>,
    pub secret: Arc<str>,
    pub metrics: Option<PrometheusHandle>,
    /// Heartbeat cadence advertised to registering instances.
    pub heartbeat_interval_secs: u64,
}

/// HTTP server for the registry.
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(
        config: &RegistryConfig,
        store: Arc<InstanceStore>,
        monitor: Arc<HealthMonitor>,
        metrics: Option<PrometheusHandle>,
    ) -> Self {
        let state = AppState {
            store,
            monitor,
            secret: Arc::from(config.server.secret.as_str()),
            metrics,
            heartbeat_interval_secs: config.registry.heartbeat_interval_secs,
        };
        let timeout = Duration::from_secs(config.server.request_timeout_secs);

        Self {
            router: build_router(state, timeout),
        }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve until `shutdown` fires, then drain in-flight requests.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
#[allow(deprecated)]
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let protected = Router::new()
        .route("/register", post(handlers::register))
        .route("/heartbeat", post(handlers::heartbeat))
        .route(
            "/unregister/{service_name}/{instance_id}",
            delete(handlers::unregister),
        )
        .route("/monitoring/reset-stats", post(handlers::reset_stats))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_secret,
        ));

    let public = Router::new()
        .route("/services", get(handlers::list_services))
        .route("/services/topics", get(handlers::topics))
        .route("/services/{service_name}", get(handlers::service_instances))
        .route(
            "/services/{service_name}/healthy",
            get(handlers::healthy_instances),
        )
        .route(
            "/services/{service_name}/instances",
            get(handlers::scrape_targets),
        )
        .route("/topics/{topic}", get(handlers::topic_subscribers))
        .route("/monitoring/stats", get(handlers::monitoring_stats))
        .route("/monitoring/health", get(handlers::monitoring_health));

    Router::new()
        .nest(API_PREFIX, protected.merge(public))
        .route("/", get(handlers::root))
        .route("/health", get(handlers::own_health))
        .route("/metrics", get(handlers::render_metrics))
        .with_state(state)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    const SECRET: &str = "test-secret";

    fn app() -> (Arc<InstanceStore>, Router) {
        let mut config = RegistryConfig::default();
        config.server.secret = SECRET.to_string();
        let store = Arc::new(InstanceStore::default());
        let monitor = Arc::new(HealthMonitor::new(Arc::clone(&store), &config));
        let server = HttpServer::new(&config, Arc::clone(&store), monitor, None);
        (store, server.router())
    }

    async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(path: &str, body: Value, secret: Option<&str>) -> Request<Body> {
        let mut builder = Request::post(format!("{}{}", API_PREFIX, path))
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(secret) = secret {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", secret));
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::get(format!("{}{}", API_PREFIX, path))
            .body(Body::empty())
            .unwrap()
    }

    fn registration(id: &str) -> Value {
        json!({
            "service_name": "billing-service",
            "instance_id": id,
            "host": "localhost",
            "port": 8080,
            "topics": ["order.created", "payment.failed"],
        })
    }

    #[tokio::test]
    async fn test_register_requires_secret() {
        let (store, router) = app();

        let (status, body) = send(&router, post_json("/register", registration("b-1"), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], auth::MISSING_HEADER);

        let (status, body) =
            send(&router, post_json("/register", registration("b-1"), Some("wrong"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["detail"], auth::INVALID_SECRET);
        assert_eq!(store.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_register_list_and_unregister() {
        let (store, router) = app();

        let (status, body) =
            send(&router, post_json("/register", registration("b-1"), Some(SECRET))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["message"], "Service billing-service:b-1 registered successfully");
        assert_eq!(body["heartbeat_interval_secs"], 60);
        assert_eq!(store.instance_count(), 1);

        let (status, body) = send(&router, get("/services")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["services"]["billing-service"][0]["instance_id"], "b-1");
        assert_eq!(body["services"]["billing-service"][0]["status"], "unknown");

        let (_, body) = send(&router, get("/services/topics")).await;
        assert_eq!(
            body,
            json!({"topics": [
                {"topic": "order.created", "services": ["billing-service"]},
                {"topic": "payment.failed", "services": ["billing-service"]},
            ]})
        );

        let request = Request::delete(format!("{}/unregister/billing-service/b-1", API_PREFIX))
            .header(header::AUTHORIZATION, format!("Bearer {}", SECRET))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "Service unregistered successfully");

        let (status, _) = send(&router, get("/services/billing-service")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = send(&router, get("/services/topics")).await;
        assert_eq!(body, json!({"topics": []}));
    }

    #[tokio::test]
    async fn test_unregister_unknown_is_not_found() {
        let (_, router) = app();
        let request = Request::delete(format!("{}/unregister/ghost/1", API_PREFIX))
            .header(header::AUTHORIZATION, format!("Bearer {}", SECRET))
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["detail"], "Service not found");
    }

    #[tokio::test]
    async fn test_heartbeat_unknown_reports_failure() {
        let (_, router) = app();
        let request = post_json(
            "/heartbeat",
            json!({"service_name": "ghost", "instance_id": "1"}),
            Some(SECRET),
        );
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], false);
        assert_eq!(body["message"], "Service not found");
    }

    #[tokio::test]
    async fn test_invalid_registration_is_unprocessable() {
        let (store, router) = app();
        let mut body = registration("b-1");
        body["health_endpoint"] = json!("health");

        let (status, _) = send(&router, post_json("/register", body, Some(SECRET))).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(store.instance_count(), 0);
    }

    #[tokio::test]
    async fn test_healthy_and_scrape_views_filter() {
        let (store, router) = app();
        for id in ["b-1", "b-2"] {
            send(&router, post_json("/register", registration(id), Some(SECRET))).await;
        }
        store.update_health(
            "billing-service",
            "b-2",
            crate::registry::InstanceStatus::Healthy,
            0.3,
        );

        let (_, body) = send(&router, get("/services/billing-service/healthy")).await;
        assert_eq!(body["healthy_instances"].as_array().unwrap().len(), 1);
        assert_eq!(body["healthy_instances"][0]["instance_id"], "b-2");

        let (_, body) = send(&router, get("/services/billing-service/instances")).await;
        assert_eq!(body[0]["targets"], json!(["localhost:8080"]));
        assert_eq!(body[0]["labels"]["instance"], "b-2");
        assert_eq!(body[0]["labels"]["status"], "healthy");

        let (_, body) = send(&router, get("/topics/order.created")).await;
        assert_eq!(body["services"], json!(["billing-service"]));
    }

    #[tokio::test]
    async fn test_monitoring_views_and_reset() {
        let (_, router) = app();

        let (status, body) = send(&router, get("/monitoring/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total_checks"], 0);
        assert_eq!(body["success_rate"], 1.0);

        let (_, body) = send(&router, get("/monitoring/health")).await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["running"], false);

        let (status, _) = send(&router, post_json("/monitoring/reset-stats", json!({}), None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let (status, body) =
            send(&router, post_json("/monitoring/reset-stats", json!({}), Some(SECRET))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
    }

    #[tokio::test]
    async fn test_own_health_and_disabled_metrics() {
        let (_, router) = app();

        let request = Request::get("/health").body(Body::empty()).unwrap();
        let (status, body) = send(&router, request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let request = Request::get("/metrics").body(Body::empty()).unwrap();
        let (status, _) = send(&router, request).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
