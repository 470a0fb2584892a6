//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured tracing events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty for development, JSON for aggregation)
//!     → GET /metrics (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (service, instance, tier, load) over formatted strings
//! - Metric updates are free functions so call sites stay one line
//! - Registry gauges are refreshed from a store snapshot at scrape time

pub mod logging;
pub mod metrics;
