//! Service registry subsystem.
//!
//! # Data Flow
//! ```text
//! Transport handlers ──register/heartbeat/unregister──▶ store.rs
//! Health monitor     ──snapshot──▶ store.rs ──probe──▶ update_health
//! Topic queries      ──────────────▶ topics.rs (derived from store contents)
//! ```
//!
//! # Design Decisions
//! - The store exclusively owns instance records; readers get copies
//! - The topic index is computed per query, never cached

pub mod instance;
pub mod store;
pub mod topics;

pub use instance::{InstanceKey, InstanceStatus, ServiceInstance, DEFAULT_HEALTH_ENDPOINT};
pub use store::InstanceStore;
