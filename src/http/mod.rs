//! HTTP transport subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, trace + timeout layers)
//!     → auth.rs (shared secret, mutating routes only)
//!     → handlers.rs (translate to store / monitor calls)
//!     → types.rs (validated request bodies, JSON responses, ApiError)
//! ```
//!
//! # Design Decisions
//! - Reads are public; register, heartbeat, unregister and stats reset need
//!   the shared secret
//! - Unknown keys are booleans in the store and become 404 or
//!   `success: false` here

pub mod auth;
pub mod handlers;
pub mod server;
pub mod types;

pub use server::{build_router, AppState, HttpServer, API_PREFIX};
