//! Configuration loading from disk and environment.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use crate::config::schema::{LogFormat, RegistryConfig};
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value '{value}' for {var}")]
    Env { var: &'static str, value: String },

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load a TOML file without env overrides or validation.
pub fn load_file(path: &Path) -> Result<RegistryConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    Ok(toml::from_str(&content)?)
}

/// Resolve the effective configuration: file (or defaults), then process
/// environment, then validation.
pub fn load_config(path: Option<&Path>) -> Result<RegistryConfig, ConfigError> {
    let mut config = match path {
        Some(path) => load_file(path)?,
        None => RegistryConfig::default(),
    };

    apply_overrides(&mut config, |var| std::env::var(var).ok())?;
    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Apply overrides from a variable lookup (the process environment in
/// production).
pub fn apply_overrides<F>(config: &mut RegistryConfig, lookup: F) -> Result<(), ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let host = lookup("SERVICE_DISCOVERY_HOST");
    let port = lookup("SERVICE_DISCOVERY_PORT");
    if host.is_some() || port.is_some() {
        let (current_host, current_port) = split_bind_address(&config.server.bind_address);
        let host = host.unwrap_or(current_host);
        let port = match port {
            Some(raw) => parse_var::<u16>("SERVICE_DISCOVERY_PORT", raw)?.to_string(),
            None => current_port,
        };
        config.server.bind_address = format!("{}:{}", host, port);
    }

    if let Some(secret) = lookup("SERVICE_DISCOVERY_SECRET") {
        config.server.secret = secret;
    }

    let monitoring = &mut config.monitoring;
    if let Some(raw) = lookup("MONITORING_ENABLED") {
        monitoring.enabled = raw.eq_ignore_ascii_case("true");
    }
    if let Some(raw) = lookup("HEALTH_CHECK_INTERVAL_SECONDS") {
        monitoring.interval_secs = parse_var("HEALTH_CHECK_INTERVAL_SECONDS", raw)?;
    }
    if let Some(raw) = lookup("HEALTH_CHECK_TIMEOUT_SECONDS") {
        let secs: u64 = parse_var("HEALTH_CHECK_TIMEOUT_SECONDS", raw)?;
        monitoring.timeout_ms = secs.saturating_mul(1_000);
    }
    if let Some(raw) = lookup("MAX_CONCURRENT_HEALTH_CHECKS") {
        monitoring.max_concurrent_checks = parse_var("MAX_CONCURRENT_HEALTH_CHECKS", raw)?;
    }
    if let Some(status) = lookup("HEALTH_CHECK_SUCCESS_STATUS") {
        monitoring.success_status = status;
    }

    if let Some(raw) = lookup("HEALTH_CHECK_RETRY_ATTEMPTS") {
        config.retries.max_attempts = parse_var("HEALTH_CHECK_RETRY_ATTEMPTS", raw)?;
    }
    if let Some(raw) = lookup("HEALTH_CHECK_RETRY_DELAY_SECONDS") {
        let secs: u64 = parse_var("HEALTH_CHECK_RETRY_DELAY_SECONDS", raw)?;
        config.retries.delay_ms = secs.saturating_mul(1_000);
    }

    let alerts = &mut config.alerts;
    if let Some(raw) = lookup("WARNING_LOAD_THRESHOLD") {
        alerts.warning_threshold = parse_var("WARNING_LOAD_THRESHOLD", raw)?;
    }
    if let Some(raw) = lookup("CRITICAL_LOAD_THRESHOLD") {
        alerts.critical_threshold = parse_var("CRITICAL_LOAD_THRESHOLD", raw)?;
    }
    if let Some(raw) = lookup("EMERGENCY_LOAD_THRESHOLD") {
        alerts.emergency_threshold = parse_var("EMERGENCY_LOAD_THRESHOLD", raw)?;
    }
    if let Some(raw) = lookup("ALERT_COOLDOWN_SECONDS") {
        alerts.cooldown_secs = parse_var("ALERT_COOLDOWN_SECONDS", raw)?;
    }

    if let Some(raw) = lookup("SERVICE_REGISTRATION_TTL_SECONDS") {
        config.registry.ttl_secs = parse_var("SERVICE_REGISTRATION_TTL_SECONDS", raw)?;
    }
    if let Some(raw) = lookup("SERVICE_HEARTBEAT_INTERVAL_SECONDS") {
        config.registry.heartbeat_interval_secs = parse_var("SERVICE_HEARTBEAT_INTERVAL_SECONDS", raw)?;
    }

    if let Some(level) = lookup("LOG_LEVEL") {
        config.observability.log_level = level.to_lowercase();
    }
    if let Some(raw) = lookup("LOG_FORMAT_TYPE") {
        config.observability.log_format = match raw.to_lowercase().as_str() {
            // "structured" is the historical name for JSON lines.
            "json" | "structured" => LogFormat::Json,
            "pretty" | "simple" => LogFormat::Pretty,
            _ => return Err(ConfigError::Env { var: "LOG_FORMAT_TYPE", value: raw }),
        };
    }

    Ok(())
}

fn parse_var<T: FromStr>(var: &'static str, raw: String) -> Result<T, ConfigError> {
    raw.trim()
        .parse()
        .map_err(|_| ConfigError::Env { var, value: raw })
}

fn split_bind_address(bind: &str) -> (String, String) {
    match bind.rsplit_once(':') {
        Some((host, port)) => (host.to_string(), port.to_string()),
        None => (bind.to_string(), "3004".to_string()),
    }
}
