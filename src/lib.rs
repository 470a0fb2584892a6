//! Lightweight service registry library.

pub mod config;
pub mod health;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod registry;
pub mod resilience;

pub use config::schema::RegistryConfig;
pub use health::HealthMonitor;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use registry::{InstanceStore, ServiceInstance};
