//! Connection registry: the single owner of live connection state.
//!
//! # Responsibilities
//! - Map visitor ids to their one live [`VisitorSession`]
//! - Map agent names to the set of their live [`AgentConnection`]s
//! - Serve lookups and presence snapshots
//! - Evict idle visitor sessions on behalf of the sweeper
//!
//! # Data Flow
//! ```text
//! handshake / read loop / router / sweeper
//!     → RegistryHandle (clone per task)
//!     → mpsc command queue
//!     → RegistryActor (owns both maps, one command at a time)
//!     → oneshot reply
//! ```
//!
//! # Design Decisions
//! - Actor instead of locks: every register, lookup, renewal and eviction
//!   observes one total order of mutations
//! - Lookups return owned snapshots; fan-out iterates the copy
//! - The actor never performs network I/O. Closing a handle only flips a flag
//!   and queues a frame for the socket's writer task

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::hub::error::HubError;
use crate::hub::session::{
    AgentConnection, ConnectionHandle, SessionState, VisitorSession, CLOSE_NORMAL,
    CLOSE_SUPERSEDED,
};
use crate::net::connection::ConnectionId;
use crate::observability::metrics;

/// Counters describing the registry contents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct RegistryStats {
    pub visitors: usize,
    pub agents: usize,
    pub agent_connections: usize,
}

enum Command {
    RegisterVisitor {
        session: VisitorSession,
        reply: oneshot::Sender<Result<VisitorSession, HubError>>,
    },
    RegisterAgent {
        connection: AgentConnection,
        reply: oneshot::Sender<bool>,
    },
    UnregisterVisitor {
        id: String,
        connection: Option<ConnectionId>,
        reply: oneshot::Sender<Option<VisitorSession>>,
    },
    UnregisterAgent {
        name: String,
        connection: ConnectionId,
        reply: oneshot::Sender<bool>,
    },
    TouchVisitor {
        id: String,
        reply: oneshot::Sender<bool>,
    },
    LookupVisitor {
        id: String,
        reply: oneshot::Sender<Option<VisitorSession>>,
    },
    LookupAgent {
        name: String,
        reply: oneshot::Sender<Vec<ConnectionHandle>>,
    },
    SnapshotOnline {
        agent: Option<String>,
        reply: oneshot::Sender<Vec<VisitorSession>>,
    },
    ExpireIdle {
        ttl: Duration,
        reply: oneshot::Sender<Vec<VisitorSession>>,
    },
    Stats {
        reply: oneshot::Sender<RegistryStats>,
    },
}

/// Which map a connection id currently lives in.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Owner {
    Visitor(String),
    Agent(String),
}

/// State owned exclusively by the actor task.
#[derive(Default)]
struct RegistryState {
    visitors: HashMap<String, VisitorSession>,
    agents: HashMap<String, HashMap<ConnectionId, AgentConnection>>,
    owners: HashMap<ConnectionId, Owner>,
}

impl RegistryState {
    fn register_visitor(&mut self, mut session: VisitorSession) -> Result<VisitorSession, HubError> {
        let conn_id = session.connection.id();
        match self.owners.get(&conn_id) {
            Some(Owner::Visitor(id)) if *id == session.id => {}
            Some(_) => return Err(HubError::ConnectionAlreadyBound(conn_id)),
            None => {}
        }

        session.state = SessionState::Online;
        session.last_activity = Instant::now();

        if let Some(mut previous) = self.visitors.remove(&session.id) {
            let previous_conn = previous.connection.id();
            if previous_conn != conn_id {
                self.owners.remove(&previous_conn);
                previous.state = SessionState::Closed;
                previous.connection.close(CLOSE_SUPERSEDED, "superseded by a newer connection");
                tracing::info!(
                    visitor_id = %session.id,
                    old_connection = %previous_conn,
                    new_connection = %conn_id,
                    "Visitor session superseded"
                );
            }
        }

        self.owners.insert(conn_id, Owner::Visitor(session.id.clone()));
        self.visitors.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn register_agent(&mut self, connection: AgentConnection) -> bool {
        let conn_id = connection.connection.id();
        if self.owners.contains_key(&conn_id) {
            return false;
        }
        self.owners.insert(conn_id, Owner::Agent(connection.agent_name.clone()));
        self.agents
            .entry(connection.agent_name.clone())
            .or_default()
            .insert(conn_id, connection);
        true
    }

    fn unregister_visitor(&mut self, id: &str, connection: Option<ConnectionId>) -> Option<VisitorSession> {
        let current = self.visitors.get(id)?.connection.id();
        if connection.is_some_and(|expected| expected != current) {
            return None;
        }

        let mut session = self.visitors.remove(id)?;
        self.owners.remove(&current);
        if session.state == SessionState::Online {
            session.state = SessionState::Closed;
        }
        session.connection.close(CLOSE_NORMAL, "session ended");
        Some(session)
    }

    fn unregister_agent(&mut self, name: &str, connection: ConnectionId) -> bool {
        let Some(set) = self.agents.get_mut(name) else {
            return false;
        };
        let removed = set.remove(&connection);
        if set.is_empty() {
            self.agents.remove(name);
        }
        match removed {
            Some(agent_conn) => {
                self.owners.remove(&connection);
                agent_conn.connection.close(CLOSE_NORMAL, "session ended");
                true
            }
            None => false,
        }
    }

    fn touch_visitor(&mut self, id: &str) -> bool {
        match self.visitors.get_mut(id) {
            Some(session) => {
                session.last_activity = Instant::now();
                true
            }
            None => false,
        }
    }

    fn snapshot_online(&self, agent: Option<&str>) -> Vec<VisitorSession> {
        // BTreeMap gives a stable, id-ordered listing
        let ordered: BTreeMap<&String, &VisitorSession> = self
            .visitors
            .iter()
            .filter(|(_, s)| s.state == SessionState::Online)
            .filter(|(_, s)| agent.map_or(true, |a| s.assigned_agent_id() == a))
            .collect();
        ordered.into_values().cloned().collect()
    }

    fn expire_idle(&mut self, ttl: Duration) -> Vec<VisitorSession> {
        let now = Instant::now();
        let expired_ids: Vec<String> = self
            .visitors
            .values()
            .filter(|s| now.saturating_duration_since(s.last_activity) > ttl)
            .map(|s| s.id.clone())
            .collect();

        let mut expired = Vec::with_capacity(expired_ids.len());
        for id in expired_ids {
            if let Some(mut session) = self.visitors.remove(&id) {
                self.owners.remove(&session.connection.id());
                session.state = SessionState::Expired;
                expired.push(session);
            }
        }
        expired
    }

    fn stats(&self) -> RegistryStats {
        RegistryStats {
            visitors: self.visitors.len(),
            agents: self.agents.len(),
            agent_connections: self.agents.values().map(HashMap::len).sum(),
        }
    }
}

/// The actor task that owns [`RegistryState`].
struct RegistryActor {
    state: RegistryState,
    commands: mpsc::UnboundedReceiver<Command>,
}

impl RegistryActor {
    async fn run(mut self) {
        tracing::debug!("Connection registry started");
        while let Some(command) = self.commands.recv().await {
            self.handle(command);
            let stats = self.state.stats();
            metrics::record_registry(stats.visitors, stats.agent_connections);
        }
        tracing::debug!("Connection registry stopped");
    }

    fn handle(&mut self, command: Command) {
        // A dropped reply receiver means the caller went away; the mutation
        // still stands.
        match command {
            Command::RegisterVisitor { session, reply } => {
                let _ = reply.send(self.state.register_visitor(session));
            }
            Command::RegisterAgent { connection, reply } => {
                let _ = reply.send(self.state.register_agent(connection));
            }
            Command::UnregisterVisitor { id, connection, reply } => {
                let _ = reply.send(self.state.unregister_visitor(&id, connection));
            }
            Command::UnregisterAgent { name, connection, reply } => {
                let _ = reply.send(self.state.unregister_agent(&name, connection));
            }
            Command::TouchVisitor { id, reply } => {
                let _ = reply.send(self.state.touch_visitor(&id));
            }
            Command::LookupVisitor { id, reply } => {
                let _ = reply.send(self.state.visitors.get(&id).cloned());
            }
            Command::LookupAgent { name, reply } => {
                let handles = self
                    .state
                    .agents
                    .get(&name)
                    .map(|set| set.values().map(|c| c.connection.clone()).collect())
                    .unwrap_or_default();
                let _ = reply.send(handles);
            }
            Command::SnapshotOnline { agent, reply } => {
                let _ = reply.send(self.state.snapshot_online(agent.as_deref()));
            }
            Command::ExpireIdle { ttl, reply } => {
                let _ = reply.send(self.state.expire_idle(ttl));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.state.stats());
            }
        }
    }
}

/// Cloneable handle to the registry actor.
///
/// Dropping every handle stops the actor.
#[derive(Debug, Clone)]
pub struct RegistryHandle {
    tx: mpsc::UnboundedSender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Command::RegisterVisitor { .. } => "RegisterVisitor",
            Command::RegisterAgent { .. } => "RegisterAgent",
            Command::UnregisterVisitor { .. } => "UnregisterVisitor",
            Command::UnregisterAgent { .. } => "UnregisterAgent",
            Command::TouchVisitor { .. } => "TouchVisitor",
            Command::LookupVisitor { .. } => "LookupVisitor",
            Command::LookupAgent { .. } => "LookupAgent",
            Command::SnapshotOnline { .. } => "SnapshotOnline",
            Command::ExpireIdle { .. } => "ExpireIdle",
            Command::Stats { .. } => "Stats",
        };
        f.write_str(name)
    }
}

impl RegistryHandle {
    /// Spawn the registry actor on the current runtime.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = RegistryActor {
            state: RegistryState::default(),
            commands: rx,
        };
        tokio::spawn(actor.run());
        Self { tx }
    }

    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T, HubError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| HubError::RegistryClosed)?;
        reply_rx.await.map_err(|_| HubError::RegistryClosed)
    }

    /// Register a visitor session, superseding and closing any existing
    /// session for the same id. Returns the stored (Online) session.
    pub async fn register_visitor(&self, session: VisitorSession) -> Result<VisitorSession, HubError> {
        self.request(|reply| Command::RegisterVisitor { session, reply })
            .await?
    }

    /// Add a connection to an agent's set. Returns `false` if this exact
    /// connection is already registered.
    pub async fn register_agent(
        &self,
        name: impl Into<String>,
        connection: ConnectionHandle,
    ) -> Result<bool, HubError> {
        let connection = AgentConnection::new(name, connection);
        self.request(|reply| Command::RegisterAgent { connection, reply })
            .await
    }

    /// Remove the visitor session for `id`, whatever connection it holds.
    pub async fn unregister_visitor(&self, id: &str) -> Result<Option<VisitorSession>, HubError> {
        let id = id.to_string();
        self.request(|reply| Command::UnregisterVisitor { id, connection: None, reply })
            .await
    }

    /// Remove the visitor session for `id` only if it is still bound to
    /// `connection`. A superseded socket's teardown is a no-op.
    pub async fn release_visitor(
        &self,
        id: &str,
        connection: ConnectionId,
    ) -> Result<Option<VisitorSession>, HubError> {
        let id = id.to_string();
        self.request(|reply| Command::UnregisterVisitor {
            id,
            connection: Some(connection),
            reply,
        })
        .await
    }

    /// Remove one agent connection. Returns `false` if it was not registered.
    pub async fn unregister_agent(&self, name: &str, connection: ConnectionId) -> Result<bool, HubError> {
        let name = name.to_string();
        self.request(|reply| Command::UnregisterAgent { name, connection, reply })
            .await
    }

    /// Renew a visitor's last activity timestamp.
    pub async fn touch_visitor(&self, id: &str) -> Result<bool, HubError> {
        let id = id.to_string();
        self.request(|reply| Command::TouchVisitor { id, reply }).await
    }

    pub async fn lookup_visitor(&self, id: &str) -> Result<Option<VisitorSession>, HubError> {
        let id = id.to_string();
        self.request(|reply| Command::LookupVisitor { id, reply }).await
    }

    /// Snapshot of an agent's live connections.
    pub async fn lookup_agent_connections(&self, name: &str) -> Result<Vec<ConnectionHandle>, HubError> {
        let name = name.to_string();
        self.request(|reply| Command::LookupAgent { name, reply }).await
    }

    /// All Online visitor sessions, ordered by visitor id.
    pub async fn snapshot_online_visitors(&self) -> Result<Vec<VisitorSession>, HubError> {
        self.request(|reply| Command::SnapshotOnline { agent: None, reply })
            .await
    }

    /// Online visitor sessions assigned to `agent`, ordered by visitor id.
    pub async fn snapshot_agent_visitors(&self, agent: &str) -> Result<Vec<VisitorSession>, HubError> {
        let agent = Some(agent.to_string());
        self.request(|reply| Command::SnapshotOnline { agent, reply })
            .await
    }

    /// Evict every session idle for longer than `ttl` in a single step.
    /// Returned sessions are in the Expired state.
    pub async fn expire_idle(&self, ttl: Duration) -> Result<Vec<VisitorSession>, HubError> {
        self.request(|reply| Command::ExpireIdle { ttl, reply }).await
    }

    pub async fn stats(&self) -> Result<RegistryStats, HubError> {
        self.request(|reply| Command::Stats { reply }).await
    }
}
