//! Health monitoring subsystem.
//!
//! # Data Flow
//! ```text
//! monitor.rs (background loop, once per interval):
//!     Snapshot store
//!     → probe.rs per instance (timeout, fixed-delay retries, payload validation)
//!     → Store status + load
//!     → alerts.rs (tier classification, per-instance cooldown)
//!     → stats.rs (check and alert counters)
//!     → TTL sweep
//! ```
//!
//! # Design Decisions
//! - A failed or invalid probe marks the instance unhealthy with load 0 and
//!   skips alert evaluation
//! - One probe's failure never affects its siblings or the loop

pub mod alerts;
pub mod monitor;
pub mod probe;
pub mod stats;

pub use alerts::{AlertState, AlertTracker, LoadThresholds, LoadTier};
pub use monitor::{CheckOutcome, CycleReport, HealthMonitor, MonitoringHealth};
pub use probe::{HealthPayload, ProbeError, Prober};
pub use stats::{MonitorStats, StatsSnapshot};
