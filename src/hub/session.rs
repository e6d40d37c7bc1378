//! Live connection handles and the sessions that own them.
//!
//! # Responsibilities
//! - Give every socket a cloneable [`ConnectionHandle`] that queues outbound
//!   frames for the socket's writer task
//! - Carry the close signal observed by the socket's read loop
//! - Describe visitor sessions and agent connections held by the registry
//!
//! # Design Decisions
//! - Writes never touch the network directly: they push onto an unbounded
//!   channel drained by a per-socket writer task
//! - A closed handle refuses further writes, so a snapshot resolved before a
//!   deregistration cannot deliver after it
//! - `close()` is idempotent and never blocks

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::hub::error::DeliveryError;
use crate::hub::event::ChatEvent;
use crate::net::connection::ConnectionId;

/// WebSocket close code sent when a newer handshake takes over a visitor id.
pub const CLOSE_SUPERSEDED: u16 = 4000;
/// WebSocket close code sent when the sweeper expires a visitor session.
pub const CLOSE_EXPIRED: u16 = 4008;
/// WebSocket close code for a normal server-side close.
pub const CLOSE_NORMAL: u16 = 1000;
/// WebSocket close code sent when the server shuts down or a peer stops
/// answering pings.
pub const CLOSE_GOING_AWAY: u16 = 1001;

/// A frame queued for a connection's writer task.
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Event(ChatEvent),
    Ping(Bytes),
    Close { code: u16, reason: &'static str },
}

/// Cloneable handle to one physical connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    tx: mpsc::UnboundedSender<Outbound>,
    closed: Arc<watch::Sender<bool>>,
}

impl ConnectionHandle {
    /// Create a handle and the receiver its writer task drains.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let handle = Self {
            id: ConnectionId::new(),
            tx,
            closed: Arc::new(closed),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue an event for delivery.
    pub fn send(&self, event: ChatEvent) -> Result<(), DeliveryError> {
        self.push(Outbound::Event(event))
    }

    /// Queue a raw frame (ping or close).
    pub fn push(&self, frame: Outbound) -> Result<(), DeliveryError> {
        if self.is_closed() {
            return Err(DeliveryError(self.id));
        }
        self.tx.send(frame).map_err(|_| DeliveryError(self.id))
    }

    /// Close the connection. Only the first call queues a close frame.
    pub fn close(&self, code: u16, reason: &'static str) {
        let was_closed = self.closed.send_replace(true);
        if !was_closed {
            let _ = self.tx.send(Outbound::Close { code, reason });
            tracing::trace!(connection_id = %self.id, code, reason, "Connection close requested");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.tx.is_closed()
    }

    /// Receiver that flips to `true` once the connection is closed.
    pub fn closed_signal(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

/// Lifecycle state of a visitor session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Online,
    Expired,
    Closed,
}

/// Presentation and routing data produced by the visitor login step.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct VisitorProfile {
    pub visitor_id: String,
    pub name: String,
    pub avatar: String,
    /// Agent this visitor is routed to.
    pub agent_id: String,
    pub client_ip: String,
    #[serde(default)]
    pub refer: String,
    #[serde(default)]
    pub city: String,
}

/// One browser tab's live chat state.
#[derive(Debug, Clone)]
pub struct VisitorSession {
    pub id: String,
    pub display_name: String,
    pub avatar_url: String,
    assigned_agent_id: String,
    pub client_address: Option<SocketAddr>,
    pub connection: ConnectionHandle,
    pub last_activity: Instant,
    pub state: SessionState,
}

impl VisitorSession {
    /// Build a session in the `Connecting` state from a login profile.
    pub fn new(
        profile: &VisitorProfile,
        connection: ConnectionHandle,
        client_address: Option<SocketAddr>,
    ) -> Self {
        Self {
            id: profile.visitor_id.clone(),
            display_name: profile.name.clone(),
            avatar_url: profile.avatar.clone(),
            assigned_agent_id: profile.agent_id.clone(),
            client_address,
            connection,
            last_activity: Instant::now(),
            state: SessionState::Connecting,
        }
    }

    /// The agent this session is routed to. Fixed for the session's lifetime.
    pub fn assigned_agent_id(&self) -> &str {
        &self.assigned_agent_id
    }

    /// The `userOnline` notice announcing this visitor to its agent.
    pub fn online_event(&self) -> ChatEvent {
        ChatEvent::UserOnline {
            uid: self.id.clone(),
            name: self.display_name.clone(),
            avatar: self.avatar_url.clone(),
        }
    }

    pub fn offline_event(&self) -> ChatEvent {
        ChatEvent::UserOffline { uid: self.id.clone() }
    }
}

/// One physical socket belonging to an agent identity.
#[derive(Debug, Clone)]
pub struct AgentConnection {
    pub agent_name: String,
    pub connection: ConnectionHandle,
    pub registered_at: Instant,
}

impl AgentConnection {
    pub fn new(agent_name: impl Into<String>, connection: ConnectionHandle) -> Self {
        Self {
            agent_name: agent_name.into(),
            connection,
            registered_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_after_close_fails() {
        let (handle, mut rx) = ConnectionHandle::new();
        handle.send(ChatEvent::UserOffline { uid: "v1".into() }).unwrap();
        handle.close(CLOSE_NORMAL, "bye");
        handle.close(CLOSE_NORMAL, "bye again");

        assert!(handle.is_closed());
        assert_eq!(
            handle.send(ChatEvent::UserOffline { uid: "v2".into() }),
            Err(DeliveryError(handle.id()))
        );

        assert!(matches!(rx.try_recv(), Ok(Outbound::Event(_))));
        assert_eq!(
            rx.try_recv(),
            Ok(Outbound::Close { code: CLOSE_NORMAL, reason: "bye" })
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn dropped_receiver_counts_as_closed() {
        let (handle, rx) = ConnectionHandle::new();
        drop(rx);
        assert!(handle.is_closed());
        assert!(handle.send(ChatEvent::UserOffline { uid: "v1".into() }).is_err());
    }

    #[tokio::test]
    async fn close_signal_fires() {
        let (handle, _rx) = ConnectionHandle::new();
        let mut signal = handle.closed_signal();
        assert!(!*signal.borrow());
        handle.close(CLOSE_EXPIRED, "expired");
        signal.changed().await.unwrap();
        assert!(*signal.borrow());
    }
}
