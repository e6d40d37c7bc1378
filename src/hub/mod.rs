//! Real-time presence and message-routing hub.
//!
//! # Data Flow
//! ```text
//! Upgrade request
//!     → handshake.rs (identity check, bind)
//!     → registry.rs (single-owner actor: visitor map + agent map)
//!
//! Per-connection read loop
//!     → router.rs (persist, resolve targets, fan out)
//!     → session.rs handles (queued writes, writer task per socket)
//!
//! Periodic:
//!     sweeper.rs → registry.rs (evict idle visitors) → router.rs (userOffline)
//!
//! Independent:
//!     legacy.rs (raw TCP client addresses, observational only)
//! ```
//!
//! # Design Decisions
//! - Registry state lives in one task; everything else talks to it through
//!   `RegistryHandle`
//! - Delivery is best effort: no queue for offline peers
//! - Write failures are disconnects, never retried

pub mod error;
pub mod event;
pub mod handshake;
pub mod legacy;
pub mod registry;
pub mod router;
pub mod session;
pub mod sweeper;

pub use error::{DeliveryError, HubError};
pub use event::{ChatEvent, ClientFrame};
pub use handshake::{HandshakeError, HandshakeGate};
pub use legacy::LegacyTcpTracker;
pub use registry::{RegistryHandle, RegistryStats};
pub use router::{Dispatch, MessageRouter, Origin, Persistence, RouteReport};
pub use session::{ConnectionHandle, Outbound, SessionState, VisitorProfile, VisitorSession};
pub use sweeper::PresenceSweeper;
