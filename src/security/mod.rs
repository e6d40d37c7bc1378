//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Visitor request (/visitor_login, /ws_visitor):
//!     → ip_blacklist.rs (refuse blocked IPs)
//!     → rate_limit.rs (per-IP token bucket)
//!     → handler / HandshakeGate
//!
//! Agent request (/ws_kefu, /visitors_kefu_online, /visitor):
//!     → agent_auth.rs (token → AgentClaim extension)
//!     → handler / HandshakeGate
//! ```
//!
//! # Design Decisions
//! - Fail closed: agent-only handlers refuse requests without a claim
//! - No trust in client input

pub mod agent_auth;
pub mod ip_blacklist;
pub mod rate_limit;

pub use agent_auth::AgentClaim;
pub use ip_blacklist::IpBlacklist;
