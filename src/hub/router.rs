//! Message routing and fan-out.
//!
//! # Responsibilities
//! - Resolve the destination connections for every [`ChatEvent`]
//! - Persist chat messages through the [`MessageStore`] collaborator
//! - Fan out to every live connection of the recipient
//! - Deregister connections whose writes fail; a dropped visitor is
//!   announced offline to its agent
//!
//! # Routing Table
//! ```text
//! message     from visitor → persist → every connection of the assigned agent
//! message     from agent   → persist → the destination visitor's connection
//! userOnline  / userOffline → every connection of the assigned agent (never persisted)
//! readReceipt from agent   → mark read → the visitor's connection
//! readReceipt from visitor → the assigned agent's connections
//! ```
//!
//! # Design Decisions
//! - Targets are resolved through the registry, then written outside it
//! - A missing destination is a normal outcome, not an error
//! - Persistence failures are reported as partial success; delivery is
//!   never rolled back

use std::sync::Arc;

use chrono::Utc;

use crate::hub::event::ChatEvent;
use crate::hub::registry::RegistryHandle;
use crate::hub::session::{ConnectionHandle, VisitorSession};
use crate::observability::metrics;
use crate::store::{MessageRecord, MessageStore, PersistenceGate, SenderRole};

/// Who produced an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Origin {
    /// A visitor's read loop. `agent` is the session's assigned agent.
    Visitor { id: String, agent: String },
    /// An agent's read loop.
    Agent { name: String },
    /// The hub itself (presence changes), addressed to `agent`.
    Hub { agent: String },
}

/// An event together with its origin, consumed once by [`MessageRouter::route`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatch {
    pub origin: Origin,
    pub event: ChatEvent,
}

impl Dispatch {
    pub fn new(origin: Origin, event: ChatEvent) -> Self {
        Self { origin, event }
    }

    /// A chat message from a visitor to its assigned agent, stamped now.
    pub fn visitor_message(visitor: &str, agent: &str, content: impl Into<String>) -> Self {
        Self::new(
            Origin::Visitor { id: visitor.to_string(), agent: agent.to_string() },
            ChatEvent::Message {
                from: visitor.to_string(),
                to: agent.to_string(),
                content: content.into(),
                sent_at: Utc::now(),
            },
        )
    }

    /// A chat message from an agent to a visitor, stamped now.
    pub fn agent_message(agent: &str, visitor: &str, content: impl Into<String>) -> Self {
        Self::new(
            Origin::Agent { name: agent.to_string() },
            ChatEvent::Message {
                from: agent.to_string(),
                to: visitor.to_string(),
                content: content.into(),
                sent_at: Utc::now(),
            },
        )
    }

    /// A presence notice addressed to `agent`.
    pub fn presence(agent: &str, event: ChatEvent) -> Self {
        Self::new(Origin::Hub { agent: agent.to_string() }, event)
    }
}

/// Outcome of persisting a routed event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Persistence {
    /// The event kind is never persisted.
    Skipped,
    Stored,
    /// The storage write failed; live delivery still happened.
    Failed(String),
}

/// What `route` did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteReport {
    /// Connections the event was written to.
    pub delivered: usize,
    pub persistence: Persistence,
}

impl RouteReport {
    fn delivered(delivered: usize) -> Self {
        Self { delivered, persistence: Persistence::Skipped }
    }

    /// Delivered (or skipped) live, but the history write failed.
    pub fn is_partial(&self) -> bool {
        matches!(self.persistence, Persistence::Failed(_))
    }
}

/// Where a resolved connection came from, so failed writes can be undone.
#[derive(Debug, Clone)]
enum Target {
    Agent(String, ConnectionHandle),
    Visitor(String, ConnectionHandle),
}

/// Delivers events between visitors and agents.
#[derive(Clone)]
pub struct MessageRouter {
    registry: RegistryHandle,
    store: Arc<dyn MessageStore>,
    gate: PersistenceGate,
}

impl MessageRouter {
    pub fn new(registry: RegistryHandle, store: Arc<dyn MessageStore>, gate: PersistenceGate) -> Self {
        Self { registry, store, gate }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    /// Route one event. Never fails: misses and transport errors are normal
    /// outcomes reflected in the report.
    pub async fn route(&self, dispatch: Dispatch) -> RouteReport {
        let Dispatch { origin, event } = dispatch;
        let kind = event.kind();

        let report = match (&origin, &event) {
            (Origin::Visitor { id, agent }, ChatEvent::Message { content, sent_at, .. }) => {
                let record = MessageRecord {
                    visitor_id: id.clone(),
                    agent_id: agent.clone(),
                    role: SenderRole::Visitor,
                    content: content.clone(),
                    sent_at: *sent_at,
                };
                let persistence = self.persist(record).await;
                let delivered = self.fan_out(self.agent_targets(agent).await, &event).await;
                RouteReport { delivered, persistence }
            }
            (Origin::Agent { name }, ChatEvent::Message { to, content, sent_at, .. }) => {
                let record = MessageRecord {
                    visitor_id: to.clone(),
                    agent_id: name.clone(),
                    role: SenderRole::Agent,
                    content: content.clone(),
                    sent_at: *sent_at,
                };
                let persistence = self.persist(record).await;
                let delivered = self.fan_out(self.visitor_target(to).await, &event).await;
                RouteReport { delivered, persistence }
            }
            (Origin::Agent { .. }, ChatEvent::ReadReceipt { visitor_id }) => {
                if let Err(e) = self.store.mark_read(visitor_id).await {
                    tracing::warn!(visitor_id = %visitor_id, error = %e, "Failed to record read state");
                }
                RouteReport::delivered(self.fan_out(self.visitor_target(visitor_id).await, &event).await)
            }
            (Origin::Visitor { agent, .. }, ChatEvent::ReadReceipt { .. }) => {
                RouteReport::delivered(self.fan_out(self.agent_targets(agent).await, &event).await)
            }
            (
                Origin::Hub { agent },
                ChatEvent::UserOnline { .. } | ChatEvent::UserOffline { .. },
            ) => RouteReport::delivered(self.fan_out(self.agent_targets(agent).await, &event).await),
            _ => {
                tracing::debug!(origin = ?origin, kind, "Event not routable from this origin, dropped");
                RouteReport::delivered(0)
            }
        };

        metrics::record_routed(kind, report.delivered);
        tracing::trace!(
            kind,
            delivered = report.delivered,
            persistence = ?report.persistence,
            "Event routed"
        );
        report
    }

    async fn persist(&self, record: MessageRecord) -> Persistence {
        match self.gate.persist(self.store.as_ref(), record).await {
            Ok(()) => Persistence::Stored,
            Err(e) => {
                tracing::error!(error = %e, "Failed to persist chat message");
                metrics::record_persist_failure();
                Persistence::Failed(e.to_string())
            }
        }
    }

    async fn agent_targets(&self, agent: &str) -> Vec<Target> {
        match self.registry.lookup_agent_connections(agent).await {
            Ok(handles) => handles
                .into_iter()
                .map(|h| Target::Agent(agent.to_string(), h))
                .collect(),
            Err(e) => {
                tracing::warn!(agent = %agent, error = %e, "Agent lookup failed");
                Vec::new()
            }
        }
    }

    async fn visitor_target(&self, visitor: &str) -> Vec<Target> {
        match self.registry.lookup_visitor(visitor).await {
            Ok(Some(session)) => vec![Target::Visitor(visitor.to_string(), session.connection)],
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(visitor_id = %visitor, error = %e, "Visitor lookup failed");
                Vec::new()
            }
        }
    }

    /// Deliver `event`, then announce `userOffline` for any visitor whose
    /// socket was dropped by a failed write.
    async fn fan_out(&self, targets: Vec<Target>, event: &ChatEvent) -> usize {
        let (delivered, released) = self.deliver(targets, event).await;
        for session in released {
            let agent = session.assigned_agent_id();
            let offline = session.offline_event();
            let (notified, _) = self.deliver(self.agent_targets(agent).await, &offline).await;
            metrics::record_routed(offline.kind(), notified);
            tracing::info!(visitor_id = %session.id, agent = %agent, notified, "Visitor offline after failed write");
        }
        delivered
    }

    /// Write `event` to every target; failed writes deregister the target.
    /// Returns the delivery count and the visitor sessions released here.
    async fn deliver(&self, targets: Vec<Target>, event: &ChatEvent) -> (usize, Vec<VisitorSession>) {
        let mut delivered = 0;
        let mut released = Vec::new();
        for target in targets {
            let handle = match &target {
                Target::Agent(_, h) | Target::Visitor(_, h) => h,
            };
            if handle.send(event.clone()).is_ok() {
                delivered += 1;
                continue;
            }

            tracing::debug!(connection_id = %handle.id(), "Write failed, deregistering connection");
            let result = match &target {
                Target::Agent(name, h) => self.registry.unregister_agent(name, h.id()).await.map(|_| ()),
                Target::Visitor(id, h) => self
                    .registry
                    .release_visitor(id, h.id())
                    .await
                    .map(|session| released.extend(session)),
            };
            if let Err(e) = result {
                tracing::debug!(error = %e, "Deregistration after failed write skipped");
            }
        }
        (delivered, released)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::session::{Outbound, VisitorProfile, VisitorSession};
    use crate::store::memory::InMemoryMessageStore;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    fn router_with(store: Arc<dyn MessageStore>) -> MessageRouter {
        MessageRouter::new(RegistryHandle::spawn(), store, PersistenceGate::new(4))
    }

    async fn visitor(router: &MessageRouter, id: &str, agent: &str) -> mpsc::UnboundedReceiver<Outbound> {
        let (handle, rx) = ConnectionHandle::new();
        let profile = VisitorProfile {
            visitor_id: id.into(),
            name: "Guest".into(),
            avatar: "a.png".into(),
            agent_id: agent.into(),
            client_ip: "127.0.0.1".into(),
            refer: String::new(),
            city: String::new(),
        };
        router
            .registry()
            .register_visitor(VisitorSession::new(&profile, handle, None))
            .await
            .unwrap();
        rx
    }

    async fn agent(router: &MessageRouter, name: &str) -> (ConnectionHandle, mpsc::UnboundedReceiver<Outbound>) {
        let (handle, rx) = ConnectionHandle::new();
        router.registry().register_agent(name, handle.clone()).await.unwrap();
        (handle, rx)
    }

    fn next_event(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Option<ChatEvent> {
        match rx.try_recv() {
            Ok(Outbound::Event(event)) => Some(event),
            _ => None,
        }
    }

    #[tokio::test]
    async fn visitor_message_fans_out_to_every_agent_connection() {
        let store = Arc::new(InMemoryMessageStore::new(100));
        let router = router_with(store.clone());
        let _v1 = visitor(&router, "v1", "kefu1").await;
        let (_a, mut rx_a) = agent(&router, "kefu1").await;
        let (_b, mut rx_b) = agent(&router, "kefu1").await;

        let report = router.route(Dispatch::visitor_message("v1", "kefu1", "hello")).await;
        assert_eq!(report.delivered, 2);
        assert_eq!(report.persistence, Persistence::Stored);

        for rx in [&mut rx_a, &mut rx_b] {
            match next_event(rx) {
                Some(ChatEvent::Message { from, content, .. }) => {
                    assert_eq!(from, "v1");
                    assert_eq!(content, "hello");
                }
                other => panic!("expected message, got {other:?}"),
            }
            assert!(next_event(rx).is_none());
        }
        assert_eq!(store.messages_for("v1").len(), 1);
    }

    #[tokio::test]
    async fn visitor_message_persisted_without_agent_connections() {
        let store = Arc::new(InMemoryMessageStore::new(100));
        let router = router_with(store.clone());
        let _v1 = visitor(&router, "v1", "kefu1").await;

        let report = router.route(Dispatch::visitor_message("v1", "kefu1", "anyone?")).await;
        assert_eq!(report.delivered, 0);
        assert_eq!(report.persistence, Persistence::Stored);
        assert_eq!(store.messages_for("v1")[0].content, "anyone?");
    }

    #[tokio::test]
    async fn agent_message_to_offline_visitor_is_persisted_only() {
        let store = Arc::new(InMemoryMessageStore::new(100));
        let router = router_with(store.clone());

        let report = router.route(Dispatch::agent_message("kefu1", "v2", "are you there")).await;
        assert_eq!(report, RouteReport { delivered: 0, persistence: Persistence::Stored });
        assert_eq!(store.messages_for("v2").len(), 1);
        assert_eq!(store.messages_for("v2")[0].role, SenderRole::Agent);
        assert!(router.registry().lookup_visitor("v2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn agent_message_reaches_single_visitor_connection() {
        let router = router_with(Arc::new(InMemoryMessageStore::new(100)));
        let mut v1 = visitor(&router, "v1", "kefu1").await;

        let report = router.route(Dispatch::agent_message("kefu1", "v1", "hi there")).await;
        assert_eq!(report.delivered, 1);
        assert!(matches!(next_event(&mut v1), Some(ChatEvent::Message { content, .. }) if content == "hi there"));
    }

    #[tokio::test]
    async fn failed_write_deregisters_connection() {
        let router = router_with(Arc::new(InMemoryMessageStore::new(100)));
        let (_live, mut live_rx) = agent(&router, "kefu1").await;
        let (dead, dead_rx) = agent(&router, "kefu1").await;
        drop(dead_rx);

        let online = ChatEvent::UserOnline { uid: "v1".into(), name: "Guest".into(), avatar: "a.png".into() };
        let report = router.route(Dispatch::presence("kefu1", online.clone())).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(next_event(&mut live_rx), Some(online));

        let remaining = router.registry().lookup_agent_connections("kefu1").await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_ne!(remaining[0].id(), dead.id());
    }

    #[tokio::test]
    async fn failed_visitor_write_announces_offline() {
        let router = router_with(Arc::new(InMemoryMessageStore::new(100)));
        let (_a, mut rx_a) = agent(&router, "kefu1").await;
        drop(visitor(&router, "v1", "kefu1").await);

        let report = router.route(Dispatch::agent_message("kefu1", "v1", "hi")).await;
        assert_eq!(report.delivered, 0);
        assert!(router.registry().lookup_visitor("v1").await.unwrap().is_none());
        assert_eq!(next_event(&mut rx_a), Some(ChatEvent::UserOffline { uid: "v1".into() }));
        assert!(next_event(&mut rx_a).is_none());

        // The socket's own teardown finds nothing left to release.
        let (stale, _) = ConnectionHandle::new();
        assert!(router.registry().release_visitor("v1", stale.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn deregistered_connection_never_receives() {
        let router = router_with(Arc::new(InMemoryMessageStore::new(100)));
        let (a, mut rx_a) = agent(&router, "kefu1").await;
        let (_b, mut rx_b) = agent(&router, "kefu1").await;
        router.registry().unregister_agent("kefu1", a.id()).await.unwrap();

        let report = router.route(Dispatch::presence("kefu1", ChatEvent::UserOffline { uid: "v1".into() })).await;
        assert_eq!(report.delivered, 1);
        assert!(next_event(&mut rx_b).is_some());
        // Only the close frame queued by deregistration
        assert!(matches!(rx_a.try_recv(), Ok(Outbound::Close { .. })));
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn read_receipt_from_agent_marks_read_and_forwards() {
        let store = Arc::new(InMemoryMessageStore::new(100));
        let router = router_with(store.clone());
        let mut v1 = visitor(&router, "v1", "kefu1").await;
        router.route(Dispatch::visitor_message("v1", "kefu1", "hello")).await;
        assert_eq!(store.unread_count("v1"), 1);

        let receipt = ChatEvent::ReadReceipt { visitor_id: "v1".into() };
        let report = router
            .route(Dispatch::new(Origin::Agent { name: "kefu1".into() }, receipt.clone()))
            .await;
        assert_eq!(report.delivered, 1);
        assert_eq!(store.unread_count("v1"), 0);
        assert_eq!(next_event(&mut v1), Some(receipt));

        // Offline sender: dropped silently
        let report = router
            .route(Dispatch::new(
                Origin::Agent { name: "kefu1".into() },
                ChatEvent::ReadReceipt { visitor_id: "gone".into() },
            ))
            .await;
        assert_eq!(report.delivered, 0);
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn persist_message(&self, _record: MessageRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("database down".into()))
        }
        async fn mark_read(&self, _visitor_id: &str) -> Result<(), StoreError> {
            Ok(())
        }
        async fn last_messages(&self, _visitor_ids: &[String]) -> Result<Vec<MessageRecord>, StoreError> {
            Ok(Vec::new())
        }
        async fn history(&self, _visitor_id: &str) -> Result<Vec<MessageRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn persistence_failure_is_partial_success() {
        let router = router_with(Arc::new(FailingStore));
        let (_a, mut rx_a) = agent(&router, "kefu1").await;

        let report = router.route(Dispatch::visitor_message("v1", "kefu1", "hello")).await;
        assert_eq!(report.delivered, 1);
        assert!(report.is_partial());
        assert!(next_event(&mut rx_a).is_some());
    }

    #[tokio::test]
    async fn presence_from_visitor_origin_is_dropped() {
        let router = router_with(Arc::new(InMemoryMessageStore::new(100)));
        let (_a, mut rx_a) = agent(&router, "kefu1").await;
        let report = router
            .route(Dispatch::new(
                Origin::Visitor { id: "v1".into(), agent: "kefu1".into() },
                ChatEvent::UserOffline { uid: "v9".into() },
            ))
            .await;
        assert_eq!(report.delivered, 0);
        assert!(next_event(&mut rx_a).is_none());
    }
}
