//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the registry.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the service registry.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RegistryConfig {
    /// Listener and shared-secret settings.
    pub server: ServerConfig,

    /// Active health monitoring settings.
    pub monitoring: MonitoringConfig,

    /// Per-probe retry policy.
    pub retries: RetryConfig,

    /// Load alert thresholds and cooldown.
    pub alerts: AlertConfig,

    /// Registration lifetime settings.
    pub registry: TtlConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address (e.g., "0.0.0.0:3004").
    pub bind_address: String,

    /// Shared secret required on write operations (Bearer token).
    pub secret: String,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3004".to_string(),
            // WARNING: This is a placeholder! Change this in production.
            secret: "service-discovery-secret-change-me".to_string(),
            request_timeout_secs: 30,
        }
    }
}

/// Health monitoring configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Enable the background monitoring loop.
    pub enabled: bool,

    /// Target cadence between cycle starts, in seconds.
    pub interval_secs: u64,

    /// Per-attempt probe timeout in milliseconds.
    pub timeout_ms: u64,

    /// Maximum probes in flight across the whole fleet.
    pub max_concurrent_checks: usize,

    /// `status` value in a health payload that means healthy.
    pub success_status: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 30,
            timeout_ms: 5_000,
            max_concurrent_checks: 10,
            success_status: "healthy".to_string(),
        }
    }
}

impl MonitoringConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Retry configuration for a single probe.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per probe, including the first.
    pub max_attempts: u32,

    /// Fixed delay between attempts in milliseconds.
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_ms: 2_000,
        }
    }
}

/// Tiered load alert configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AlertConfig {
    pub warning_threshold: f64,
    pub critical_threshold: f64,
    pub emergency_threshold: f64,

    /// Minimum seconds between two fired alerts for one instance, any tier.
    pub cooldown_secs: u64,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            warning_threshold: 0.6,
            critical_threshold: 0.8,
            emergency_threshold: 0.95,
            cooldown_secs: 300,
        }
    }
}

impl AlertConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
}

/// Registration lifetime configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TtlConfig {
    /// Seconds after the last heartbeat before an instance is removed.
    pub ttl_secs: u64,

    /// Heartbeat cadence advertised to clients.
    pub heartbeat_interval_secs: u64,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            heartbeat_interval_secs: 60,
        }
    }
}

impl TtlConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Human-readable or JSON log lines.
    pub log_format: LogFormat,

    /// Install the Prometheus recorder and serve `/metrics`.
    pub metrics_enabled: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
        }
    }
}
