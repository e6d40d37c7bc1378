//! WebSocket endpoints for visitors and agents.
//!
//! # Responsibilities
//! - Run the handshake gate before upgrading
//! - Give each socket a writer task fed by its [`ConnectionHandle`]
//! - Run one read loop per socket: renew activity, parse frames, route them
//! - Keep the socket alive with pings; drop peers that stop answering
//! - Deregister on close, error, supersede or expiry
//!
//! # Data Flow
//! ```text
//!                 ┌──────────── writer task ◀── ConnectionHandle ◀── MessageRouter
//! socket ─split─▶ │
//!                 └──────────── read loop ──▶ ClientFrame ──▶ MessageRouter::route
//!                                   │
//!                                   ├── ping timer / pong deadline
//!                                   ├── closed_signal (supersede, expiry, failed write)
//!                                   └── shutdown
//! ```
//!
//! # Design Decisions
//! - Frames from one socket are routed one at a time, in arrival order
//! - Teardown releases the visitor only if this socket still owns the id,
//!   so a superseded socket never takes its successor offline
//! - `userOffline` is sent by whoever actually removed the session (read
//!   loop or sweeper), never both

use std::net::SocketAddr;
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, Utf8Bytes, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::response::Response;
use axum::Extension;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};

use crate::hub::event::{ChatEvent, ClientFrame};
use crate::hub::handshake::HandshakeError;
use crate::hub::router::{Dispatch, Origin};
use crate::hub::session::{ConnectionHandle, Outbound, VisitorProfile, CLOSE_GOING_AWAY, CLOSE_NORMAL};
use crate::http::server::AppState;
use crate::net::connection::ConnectionRole;
use crate::notifications::{spawn_notify, Arrival};
use crate::security::agent_auth::AgentClaim;

#[derive(Debug, Deserialize)]
pub struct VisitorParams {
    #[serde(alias = "visitorId")]
    pub visitor_id: Option<String>,
}

/// Heartbeat settings captured at upgrade time.
#[derive(Debug, Clone, Copy)]
struct Heartbeat {
    interval: Duration,
    pong_timeout: Duration,
}

impl Heartbeat {
    fn from_state(state: &AppState) -> Self {
        let config = state.config.load();
        Self {
            interval: Duration::from_secs(config.heartbeat.ping_interval_secs.max(1)),
            pong_timeout: Duration::from_secs(config.heartbeat.pong_timeout_secs.max(1)),
        }
    }
}

/// `GET /ws_visitor?visitor_id=...`
pub async fn ws_visitor(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Query(params): Query<VisitorParams>,
) -> Result<Response, HandshakeError> {
    let profile = state.gate.check_visitor(params.visitor_id.as_deref())?;
    let max = state.config.load().security.max_frame_size;
    Ok(ws
        .max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| visitor_socket(state, socket, profile, addr)))
}

/// `GET /ws_kefu` with a bearer token (header or `?token=`).
pub async fn ws_kefu(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    claim: Option<Extension<AgentClaim>>,
) -> Result<Response, HandshakeError> {
    let agent = state.gate.check_agent(claim.as_ref().map(|Extension(c)| c))?;
    let max = state.config.load().security.max_frame_size;
    Ok(ws
        .max_message_size(max)
        .max_frame_size(max)
        .on_upgrade(move |socket| agent_socket(state, socket, agent)))
}

async fn visitor_socket(state: AppState, socket: WebSocket, profile: VisitorProfile, addr: SocketAddr) {
    let (handle, outbound) = ConnectionHandle::new();
    let connection_id = handle.id();
    let _guard = state.connections.track(ConnectionRole::Visitor, connection_id);
    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound));

    let session = match state.gate.bind_visitor(&profile, handle.clone(), Some(addr)).await {
        Ok(session) => session,
        Err(e) => {
            tracing::error!(visitor_id = %profile.visitor_id, error = %e, "Failed to bind visitor socket");
            handle.close(CLOSE_GOING_AWAY, "hub unavailable");
            let _ = writer.await;
            return;
        }
    };
    let visitor_id = session.id.clone();
    let agent = session.assigned_agent_id().to_string();

    spawn_notify(
        state.notifier.clone(),
        Arrival::incoming(&agent, &visitor_id, &session.display_name, &session.avatar_url),
    );

    let reader = &VisitorReader {
        state: &state,
        visitor_id: &visitor_id,
        agent: &agent,
    };
    let heartbeat = Heartbeat::from_state(&state);
    read_loop(&state, &handle, Some(&visitor_id), stream, heartbeat, move |text| reader.on_text(text)).await;

    match state.router.registry().release_visitor(&visitor_id, connection_id).await {
        Ok(Some(released)) => {
            tracing::info!(visitor_id = %visitor_id, agent = %agent, connection_id = %connection_id, "Visitor offline");
            state
                .router
                .route(Dispatch::presence(&agent, released.offline_event()))
                .await;
        }
        Ok(None) => {
            tracing::debug!(visitor_id = %visitor_id, connection_id = %connection_id, "Socket no longer owns visitor session");
        }
        Err(e) => tracing::warn!(visitor_id = %visitor_id, error = %e, "Failed to release visitor"),
    }

    handle.close(CLOSE_NORMAL, "closed");
    let _ = writer.await;
}

struct VisitorReader<'a> {
    state: &'a AppState,
    visitor_id: &'a str,
    agent: &'a str,
}

impl VisitorReader<'_> {
    async fn on_text(&self, text: String) {
        let frame = match ClientFrame::parse(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(visitor_id = %self.visitor_id, error = %e, "Unparseable visitor frame ignored");
                return;
            }
        };
        let origin = Origin::Visitor {
            id: self.visitor_id.to_string(),
            agent: self.agent.to_string(),
        };
        let dispatch = match frame {
            ClientFrame::Message { content, .. } if content.trim().is_empty() => {
                tracing::debug!(visitor_id = %self.visitor_id, "Empty visitor message ignored");
                return;
            }
            ClientFrame::Message { content, .. } => Dispatch::visitor_message(self.visitor_id, self.agent, content),
            ClientFrame::ReadReceipt { .. } => Dispatch::new(
                origin,
                ChatEvent::ReadReceipt {
                    visitor_id: self.visitor_id.to_string(),
                },
            ),
            ClientFrame::Ping => return,
        };
        let report = self.state.router.route(dispatch).await;
        if report.is_partial() {
            tracing::warn!(visitor_id = %self.visitor_id, persistence = ?report.persistence, "Message delivered but not stored");
        }
    }
}

async fn agent_socket(state: AppState, socket: WebSocket, agent: String) {
    let (handle, outbound) = ConnectionHandle::new();
    let connection_id = handle.id();
    let _guard = state.connections.track(ConnectionRole::Agent, connection_id);
    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(sink, outbound));

    if let Err(e) = state.gate.bind_agent(&agent, handle.clone()).await {
        tracing::error!(agent = %agent, error = %e, "Failed to bind agent socket");
        handle.close(CLOSE_GOING_AWAY, "hub unavailable");
        let _ = writer.await;
        return;
    }

    let reader = &AgentReader { state: &state, agent: &agent };
    let heartbeat = Heartbeat::from_state(&state);
    read_loop(&state, &handle, None, stream, heartbeat, move |text| reader.on_text(text)).await;

    match state.router.registry().unregister_agent(&agent, connection_id).await {
        Ok(removed) => tracing::info!(agent = %agent, connection_id = %connection_id, removed, "Agent connection closed"),
        Err(e) => tracing::warn!(agent = %agent, error = %e, "Failed to unregister agent connection"),
    }

    handle.close(CLOSE_NORMAL, "closed");
    let _ = writer.await;
}

struct AgentReader<'a> {
    state: &'a AppState,
    agent: &'a str,
}

impl AgentReader<'_> {
    async fn on_text(&self, text: String) {
        let frame = match ClientFrame::parse(&text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(agent = %self.agent, error = %e, "Unparseable agent frame ignored");
                return;
            }
        };
        let dispatch = match frame {
            ClientFrame::Message { content, .. } if content.trim().is_empty() => {
                tracing::debug!(agent = %self.agent, "Empty agent message ignored");
                return;
            }
            ClientFrame::Message { to: Some(visitor), content } => Dispatch::agent_message(self.agent, &visitor, content),
            ClientFrame::Message { to: None, .. } => {
                tracing::debug!(agent = %self.agent, "Agent message without destination ignored");
                return;
            }
            ClientFrame::ReadReceipt { visitor_id } => Dispatch::new(
                Origin::Agent {
                    name: self.agent.to_string(),
                },
                ChatEvent::ReadReceipt { visitor_id },
            ),
            ClientFrame::Ping => return,
        };
        let report = self.state.router.route(dispatch).await;
        if report.is_partial() {
            tracing::warn!(agent = %self.agent, persistence = ?report.persistence, "Message delivered but not stored");
        }
    }
}

/// Drive one socket until it closes, is closed by the hub, stops answering
/// pings, or the server shuts down. For visitor sockets every inbound frame
/// renews activity.
async fn read_loop<F, Fut>(
    state: &AppState,
    handle: &ConnectionHandle,
    visitor_id: Option<&str>,
    mut stream: SplitStream<WebSocket>,
    heartbeat: Heartbeat,
    mut on_text: F,
) where
    F: FnMut(String) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut closed = handle.closed_signal();
    let mut shutdown = state.shutdown.subscribe();
    let mut ping = tokio::time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
    let mut pong_deadline: Option<Instant> = None;
    let registry = state.router.registry();
    let owner = handle.id();
    if *closed.borrow_and_update() {
        return;
    }

    loop {
        tokio::select! {
            frame = stream.next() => {
                let Some(Ok(frame)) = frame else { break };
                if let Some(id) = visitor_id {
                    if let Err(e) = registry.touch_visitor(id).await {
                        tracing::warn!(error = %e, "Failed to renew visitor activity");
                    }
                }
                match frame {
                    Message::Text(text) => on_text(text.to_string()).await,
                    // Pongs to client pings are queued by the socket itself.
                    Message::Ping(_) => {}
                    Message::Pong(_) => pong_deadline = None,
                    Message::Binary(_) => {
                        tracing::debug!(connection_id = %owner, "Binary frame ignored");
                    }
                    Message::Close(_) => break,
                }
            }
            _ = ping.tick() => {
                if pong_deadline.is_none() {
                    pong_deadline = Some(Instant::now() + heartbeat.pong_timeout);
                }
                if handle.push(Outbound::Ping(Default::default())).is_err() {
                    break;
                }
            }
            _ = async { sleep_until(pong_deadline.unwrap_or_else(Instant::now)).await }, if pong_deadline.is_some() => {
                tracing::info!(connection_id = %owner, "Peer stopped answering pings");
                handle.close(CLOSE_GOING_AWAY, "ping timeout");
                break;
            }
            changed = closed.changed() => {
                if changed.is_err() || *closed.borrow() {
                    break;
                }
            }
            _ = shutdown.recv() => {
                handle.close(CLOSE_GOING_AWAY, "server shutting down");
                break;
            }
        }
    }
}

/// Drain queued frames onto the socket. Ends after a close frame or the
/// first failed write; dropping the receiver then marks the handle closed.
async fn write_loop(mut sink: SplitSink<WebSocket, Message>, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
    while let Some(frame) = outbound.recv().await {
        let (message, last) = match frame {
            Outbound::Event(event) => match event.to_json() {
                Ok(json) => (Message::Text(json.into()), false),
                Err(e) => {
                    tracing::warn!(kind = event.kind(), error = %e, "Failed to encode event");
                    continue;
                }
            },
            Outbound::Ping(data) => (Message::Ping(data), false),
            Outbound::Close { code, reason } => (
                Message::Close(Some(CloseFrame {
                    code,
                    reason: Utf8Bytes::from_static(reason),
                })),
                true,
            ),
        };
        if let Err(e) = sink.send(message).await {
            tracing::debug!(error = %e, "Socket write failed");
            break;
        }
        if last {
            break;
        }
    }
    let _ = sink.close().await;
}
