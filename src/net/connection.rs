//! Connection identity and lifecycle tracking.
//!
//! # Responsibilities
//! - Generate unique connection IDs for tracing and registry bookkeeping
//! - Count live WebSocket connections per role
//! - Let shutdown wait for sockets to drain

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::observability::metrics;

/// Global atomic counter for connection IDs.
/// Relaxed ordering is enough: only uniqueness matters.
static CONNECTION_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generate a new unique connection ID.
    pub fn new() -> Self {
        Self(CONNECTION_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Which side of the conversation a socket belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionRole {
    Visitor,
    Agent,
}

impl ConnectionRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionRole::Visitor => "visitor",
            ConnectionRole::Agent => "agent",
        }
    }
}

#[derive(Debug, Default)]
struct Counts {
    visitors: AtomicU64,
    agents: AtomicU64,
}

impl Counts {
    fn slot(&self, role: ConnectionRole) -> &AtomicU64 {
        match role {
            ConnectionRole::Visitor => &self.visitors,
            ConnectionRole::Agent => &self.agents,
        }
    }
}

/// Tracks live WebSocket connections for status reporting and graceful shutdown.
#[derive(Debug, Clone, Default)]
pub struct ConnectionTracker {
    counts: Arc<Counts>,
}

/// Live socket counts by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConnectionCounts {
    pub visitors: u64,
    pub agents: u64,
}

impl ConnectionTracker {
    /// Create a new connection tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new live socket. Returns a guard that decrements on drop.
    pub fn track(&self, role: ConnectionRole, id: ConnectionId) -> ConnectionGuard {
        let now = self.counts.slot(role).fetch_add(1, Ordering::SeqCst) + 1;
        metrics::record_connections(role.as_str(), now);
        tracing::trace!(connection_id = %id, role = role.as_str(), "Connection opened");
        ConnectionGuard {
            counts: Arc::clone(&self.counts),
            role,
            id,
        }
    }

    /// Current live socket counts.
    pub fn counts(&self) -> ConnectionCounts {
        ConnectionCounts {
            visitors: self.counts.visitors.load(Ordering::SeqCst),
            agents: self.counts.agents.load(Ordering::SeqCst),
        }
    }

    /// Total live sockets.
    pub fn active_count(&self) -> u64 {
        let c = self.counts();
        c.visitors + c.agents
    }

    /// Wait until every socket has closed or the deadline passes.
    /// Returns whether the drain completed.
    pub async fn wait_for_drain(&self, deadline: Duration) -> bool {
        let drained = async {
            while self.active_count() > 0 {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(deadline, drained).await.is_ok()
    }
}

/// Guard that tracks a socket's lifetime.
/// Decrements the role count when dropped.
#[derive(Debug)]
pub struct ConnectionGuard {
    counts: Arc<Counts>,
    role: ConnectionRole,
    id: ConnectionId,
}

impl ConnectionGuard {
    /// Get this connection's ID.
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let now = self.counts.slot(self.role).fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::record_connections(self.role.as_str(), now);
        tracing::trace!(connection_id = %self.id, role = self.role.as_str(), "Connection closed");
    }
}
