//! Discovery API handlers.
//!
//! Handlers are thin: they translate between HTTP and the store or monitor
//! and never hold the store lock themselves.

use axum::{
    extract::{Path, State},
    http::header::CONTENT_TYPE,
    response::IntoResponse,
    Json,
};
use serde_json::{json, Value};

use crate::http::server::AppState;
use crate::http::types::{
    ActionResponse, ApiError, HealthyInstancesResponse, HeartbeatRequest, MonitoringStatsResponse,
    PrometheusTarget, RegisterRequest, ServiceInstancesResponse, ServiceListResponse, TopicEntry,
    TopicsResponse,
};
use crate::health::monitor::MonitoringHealth;
use crate::observability::metrics;

const SERVICE_NOT_FOUND: &str = "Service not found";

pub async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<ActionResponse>, ApiError> {
    let instance = request.into_instance()?;
    let message = format!(
        "Service {}:{} registered successfully",
        instance.service_name, instance.instance_id
    );

    state.store.register(instance);
    Ok(Json(
        ActionResponse::ok(message).with_heartbeat_interval(state.heartbeat_interval_secs),
    ))
}

pub async fn heartbeat(
    State(state): State<AppState>,
    Json(request): Json<HeartbeatRequest>,
) -> Json<ActionResponse> {
    if state
        .store
        .update_heartbeat(&request.service_name, &request.instance_id)
    {
        Json(ActionResponse::ok("Heartbeat updated successfully"))
    } else {
        tracing::debug!(
            service = %request.service_name,
            instance = %request.instance_id,
            "Heartbeat for unknown instance"
        );
        Json(ActionResponse::failed(SERVICE_NOT_FOUND))
    }
}

pub async fn unregister(
    State(state): State<AppState>,
    Path((service_name, instance_id)): Path<(String, String)>,
) -> Result<Json<ActionResponse>, ApiError> {
    if state.store.unregister(&service_name, &instance_id) {
        Ok(Json(ActionResponse::ok("Service unregistered successfully")))
    } else {
        Err(ApiError::NotFound(SERVICE_NOT_FOUND.to_string()))
    }
}

pub async fn list_services(State(state): State<AppState>) -> Json<ServiceListResponse> {
    Json(ServiceListResponse {
        services: state.store.get_all(),
    })
}

pub async fn service_instances(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
) -> Result<Json<ServiceInstancesResponse>, ApiError> {
    let instances = state.store.get_instances(&service_name);
    if instances.is_empty() {
        return Err(ApiError::NotFound(format!(
            "Service '{}' not found",
            service_name
        )));
    }

    Ok(Json(ServiceInstancesResponse {
        service_name,
        instances,
    }))
}

pub async fn healthy_instances(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
) -> Json<HealthyInstancesResponse> {
    let healthy_instances = state.store.get_healthy_instances(&service_name);
    Json(HealthyInstancesResponse {
        service_name,
        healthy_instances,
    })
}

/// Healthy instances in Prometheus HTTP SD format.
pub async fn scrape_targets(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
) -> Json<Vec<PrometheusTarget>> {
    let targets = state
        .store
        .get_healthy_instances(&service_name)
        .iter()
        .map(PrometheusTarget::from)
        .collect();
    Json(targets)
}

pub async fn topics(State(state): State<AppState>) -> Json<TopicsResponse> {
    Json(TopicsResponse::from(state.store.topic_map()))
}

pub async fn topic_subscribers(
    State(state): State<AppState>,
    Path(topic): Path<String>,
) -> Json<TopicEntry> {
    let services = state.store.services_for_topic(&topic);
    Json(TopicEntry { topic, services })
}

pub async fn monitoring_stats(State(state): State<AppState>) -> Json<MonitoringStatsResponse> {
    let stats = state.monitor.stats();
    Json(MonitoringStatsResponse {
        stats,
        success_rate: stats.success_rate(),
        alert_states: state.monitor.alert_states(),
    })
}

pub async fn monitoring_health(State(state): State<AppState>) -> Json<MonitoringHealth> {
    Json(state.monitor.monitoring_health())
}

pub async fn reset_stats(State(state): State<AppState>) -> Json<ActionResponse> {
    state.monitor.reset_stats();
    Json(ActionResponse::ok("Monitoring statistics reset"))
}

/// Prometheus exposition of registry and monitoring metrics.
pub async fn render_metrics(State(state): State<AppState>) -> Result<impl IntoResponse, ApiError> {
    let handle = state
        .metrics
        .as_ref()
        .ok_or(ApiError::Unavailable("Metrics are disabled"))?;

    metrics::refresh_registry_gauges(&state.store.get_all());
    Ok((
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}

pub async fn root() -> Json<Value> {
    Json(json!({ "message": "Service registry is running" }))
}

/// Health payload of the registry itself, in the shape it expects from others.
pub async fn own_health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "service-registry",
        "load_percentage": 0.0,
    }))
}
