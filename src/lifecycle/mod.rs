//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (main.rs):
//!     Load config → Validate → Logging → Metrics → Store → Monitor → Listener
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Stop monitor (awaits loop exit) → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - The monitor is stopped after the listener drains, so no request observes
//!   a half-stopped registry

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::wait_for_signal;
