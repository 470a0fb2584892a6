//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds in [0, 1], positive intervals)
//! - Check threshold ordering (warning < critical < emergency)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RegistryConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use crate::config::schema::RegistryConfig;

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A single semantic problem with a configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &RegistryConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.server.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "server.bind_address",
            format!("'{}' is not a socket address", config.server.bind_address),
        ));
    }
    if config.server.secret.is_empty() {
        errors.push(ValidationError::new("server.secret", "must not be empty"));
    }
    if config.server.request_timeout_secs == 0 {
        errors.push(ValidationError::new("server.request_timeout_secs", "must be greater than 0"));
    }

    let monitoring = &config.monitoring;
    if monitoring.interval_secs == 0 {
        errors.push(ValidationError::new("monitoring.interval_secs", "must be greater than 0"));
    }
    if monitoring.timeout_ms == 0 {
        errors.push(ValidationError::new("monitoring.timeout_ms", "must be greater than 0"));
    }
    if monitoring.max_concurrent_checks == 0 {
        errors.push(ValidationError::new("monitoring.max_concurrent_checks", "must be greater than 0"));
    }
    if monitoring.success_status.is_empty() {
        errors.push(ValidationError::new("monitoring.success_status", "must not be empty"));
    }

    if config.retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }

    let alerts = &config.alerts;
    for (field, value) in [
        ("alerts.warning_threshold", alerts.warning_threshold),
        ("alerts.critical_threshold", alerts.critical_threshold),
        ("alerts.emergency_threshold", alerts.emergency_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            errors.push(ValidationError::new(field, format!("{} is outside [0, 1]", value)));
        }
    }
    if !(alerts.warning_threshold < alerts.critical_threshold
        && alerts.critical_threshold < alerts.emergency_threshold)
    {
        errors.push(ValidationError::new(
            "alerts",
            "thresholds must satisfy warning < critical < emergency",
        ));
    }

    if config.registry.ttl_secs == 0 {
        errors.push(ValidationError::new("registry.ttl_secs", "must be greater than 0"));
    }

    if !LOG_LEVELS.contains(&config.observability.log_level.as_str()) {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("'{}' is not one of {}", config.observability.log_level, LOG_LEVELS.join(", ")),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
