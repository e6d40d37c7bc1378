//! Handshake gate: identity checks before a socket is opened, and binding
//! of the opened socket into the registry.
//!
//! # Responsibilities
//! - Visitor path: require a visitor id issued by a prior login
//! - Agent path: require the identity claim attached by the auth layer
//! - Bind the new connection and announce arriving visitors
//!
//! # Design Decisions
//! - Checks run before the HTTP upgrade; a rejected request never becomes a
//!   socket and never reaches the registry
//! - The agent claim is trusted as-is; verification belongs to the auth layer
//! - The IP blacklist runs as middleware in front of the gate

use std::net::SocketAddr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::hub::error::HubError;
use crate::hub::router::{Dispatch, MessageRouter};
use crate::hub::session::{ConnectionHandle, VisitorProfile, VisitorSession};
use crate::observability::metrics;
use crate::security::agent_auth::AgentClaim;
use crate::visitors::VisitorDirectory;

/// Reasons an upgrade request is refused.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandshakeError {
    #[error("missing visitor id")]
    MissingVisitorId,

    #[error("unknown visitor id: {0}")]
    UnknownVisitor(String),

    #[error("missing agent identity")]
    MissingAgentClaim,
}

impl HandshakeError {
    fn status(&self) -> StatusCode {
        match self {
            HandshakeError::MissingVisitorId => StatusCode::BAD_REQUEST,
            HandshakeError::UnknownVisitor(_) => StatusCode::FORBIDDEN,
            HandshakeError::MissingAgentClaim => StatusCode::UNAUTHORIZED,
        }
    }

    fn reason(&self) -> &'static str {
        match self {
            HandshakeError::MissingVisitorId => "missing_visitor_id",
            HandshakeError::UnknownVisitor(_) => "unknown_visitor",
            HandshakeError::MissingAgentClaim => "missing_agent_claim",
        }
    }
}

impl IntoResponse for HandshakeError {
    fn into_response(self) -> Response {
        metrics::record_handshake_rejected(self.reason());
        tracing::warn!(reason = self.reason(), error = %self, "Handshake rejected");
        (self.status(), self.to_string()).into_response()
    }
}

/// Validates upgrade requests and binds accepted connections.
#[derive(Clone)]
pub struct HandshakeGate {
    router: MessageRouter,
    directory: VisitorDirectory,
}

impl HandshakeGate {
    pub fn new(router: MessageRouter, directory: VisitorDirectory) -> Self {
        Self { router, directory }
    }

    pub fn router(&self) -> &MessageRouter {
        &self.router
    }

    /// Resolve the login profile for a visitor upgrade.
    pub fn check_visitor(&self, visitor_id: Option<&str>) -> Result<VisitorProfile, HandshakeError> {
        let id = visitor_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or(HandshakeError::MissingVisitorId)?;
        self.directory
            .get(id)
            .ok_or_else(|| HandshakeError::UnknownVisitor(id.to_string()))
    }

    /// Extract the trusted agent name for an agent upgrade.
    pub fn check_agent(&self, claim: Option<&AgentClaim>) -> Result<String, HandshakeError> {
        claim
            .map(|c| c.agent_name.clone())
            .ok_or(HandshakeError::MissingAgentClaim)
    }

    /// Register an opened visitor socket and announce it to the assigned
    /// agent's connections.
    pub async fn bind_visitor(
        &self,
        profile: &VisitorProfile,
        connection: ConnectionHandle,
        client_address: Option<SocketAddr>,
    ) -> Result<VisitorSession, HubError> {
        let session = VisitorSession::new(profile, connection, client_address);
        let session = self.router.registry().register_visitor(session).await?;

        let report = self
            .router
            .route(Dispatch::presence(session.assigned_agent_id(), session.online_event()))
            .await;
        tracing::info!(
            visitor_id = %session.id,
            agent = %session.assigned_agent_id(),
            connection_id = %session.connection.id(),
            notified = report.delivered,
            "Visitor online"
        );
        Ok(session)
    }

    /// Register an opened agent socket.
    pub async fn bind_agent(&self, agent_name: &str, connection: ConnectionHandle) -> Result<bool, HubError> {
        let connection_id = connection.id();
        let added = self.router.registry().register_agent(agent_name, connection).await?;
        tracing::info!(agent = %agent_name, connection_id = %connection_id, added, "Agent connection registered");
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::hub::event::ChatEvent;
    use crate::hub::registry::RegistryHandle;
    use crate::hub::session::Outbound;
    use crate::store::memory::InMemoryMessageStore;
    use crate::store::PersistenceGate;

    fn gate() -> HandshakeGate {
        let router = MessageRouter::new(
            RegistryHandle::spawn(),
            Arc::new(InMemoryMessageStore::new(10)),
            PersistenceGate::new(1),
        );
        HandshakeGate::new(router, VisitorDirectory::new())
    }

    fn profile(id: &str) -> VisitorProfile {
        VisitorProfile {
            visitor_id: id.into(),
            name: "Guest".into(),
            avatar: "a.png".into(),
            agent_id: "kefu1".into(),
            client_ip: "127.0.0.1".into(),
            refer: String::new(),
            city: String::new(),
        }
    }

    #[tokio::test]
    async fn visitor_checks() {
        let gate = gate();
        assert_eq!(gate.check_visitor(None), Err(HandshakeError::MissingVisitorId));
        assert_eq!(gate.check_visitor(Some("  ")), Err(HandshakeError::MissingVisitorId));
        assert_eq!(
            gate.check_visitor(Some("v1")),
            Err(HandshakeError::UnknownVisitor("v1".into()))
        );

        gate.directory.upsert(profile("v1"));
        assert_eq!(gate.check_visitor(Some("v1")).unwrap().agent_id, "kefu1");
    }

    #[tokio::test]
    async fn agent_checks() {
        let gate = gate();
        assert_eq!(gate.check_agent(None), Err(HandshakeError::MissingAgentClaim));
        let claim = AgentClaim { agent_name: "kefu1".into() };
        assert_eq!(gate.check_agent(Some(&claim)).unwrap(), "kefu1");
    }

    #[test]
    fn rejection_statuses() {
        assert_eq!(HandshakeError::MissingVisitorId.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            HandshakeError::UnknownVisitor("x".into()).into_response().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(HandshakeError::MissingAgentClaim.into_response().status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn binding_visitor_announces_to_agent() {
        let gate = gate();
        let (agent_conn, mut agent_rx) = ConnectionHandle::new();
        gate.bind_agent("kefu1", agent_conn).await.unwrap();

        let (visitor_conn, _visitor_rx) = ConnectionHandle::new();
        let session = gate.bind_visitor(&profile("v1"), visitor_conn, None).await.unwrap();
        assert_eq!(session.assigned_agent_id(), "kefu1");

        assert_eq!(
            agent_rx.try_recv(),
            Ok(Outbound::Event(ChatEvent::UserOnline {
                uid: "v1".into(),
                name: "Guest".into(),
                avatar: "a.png".into(),
            }))
        );
    }
}
