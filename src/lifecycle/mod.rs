//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Load config → Build hub state → Start sweeper → Start listeners
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Stop accepting → Close sockets → Drain → Exit
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: config first, then core, then listeners
//! - Ordered shutdown: stop accept, close sockets, drain
//! - Shutdown has timeout: exit after the drain deadline regardless

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{start, RunningHub, StartupError};
