//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! WebSocket / HTTP traffic
//!     → tls.rs (optional TLS via axum-server)
//!     → connection.rs (IDs, live socket counts)
//!     → hand off to the http layer
//!
//! Legacy raw TCP
//!     → listener.rs (accept loop, connection limits)
//!     → LegacyTcpTracker (peer listed while connected)
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each socket tracked for graceful shutdown
//! - TLS is optional and handled transparently

pub mod connection;
pub mod listener;
pub mod tls;

pub use connection::{ConnectionId, ConnectionRole, ConnectionTracker};
