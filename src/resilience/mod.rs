//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Health probe:
//!     → timeout per attempt (enforced by the prober)
//!     → On transport error or timeout: retries.rs (fixed delay, bounded attempts)
//!     → Final error surfaces to the monitor, which marks the instance unhealthy
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every outbound probe has a deadline
//! - Only transport-level failures are retried; a bad answer is an answer

pub mod retries;

pub use retries::RetryPolicy;
