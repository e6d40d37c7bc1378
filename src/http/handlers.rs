//! HTTP queries around the live hub: visitor login, presence snapshots,
//! history and the legacy TCP reset.

use std::collections::HashMap;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, Form, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;
use serde::{Deserialize, Serialize};

use crate::hub::session::VisitorSession;
use crate::http::request::RequestId;
use crate::http::response::ApiResponse;
use crate::http::server::AppState;
use crate::notifications::{spawn_notify, Arrival};
use crate::observability::metrics;
use crate::security::agent_auth::AgentClaim;
use crate::store::MessageRecord;
use crate::visitors::login::{build_profile, LoginForm};

/// Placeholder shown to agents for visitors with no history yet.
pub const NEW_VISITOR: &str = "new visitor";

#[derive(Debug, Deserialize)]
pub struct VisitorQuery {
    #[serde(rename = "visitorId")]
    pub visitor_id: String,
}

#[derive(Debug, Deserialize)]
pub struct NoticeQuery {
    pub kefu_id: String,
}

/// One row of a presence snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineVisitor {
    pub uid: String,
    pub name: String,
    pub avatar: String,
    pub last_message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineSnapshot {
    pub ws: Vec<OnlineVisitor>,
    pub tcp: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct Notice {
    pub nickname: String,
    pub welcome: String,
}

fn unauthorized() -> Response {
    ApiResponse::error(StatusCode::UNAUTHORIZED, "missing or invalid agent token").into_response()
}

fn unavailable(e: impl std::fmt::Display) -> Response {
    tracing::error!(error = %e, "Hub unavailable");
    ApiResponse::error(StatusCode::SERVICE_UNAVAILABLE, "hub unavailable").into_response()
}

/// Attach each visitor's most recent stored message. A store failure only
/// blanks the previews.
async fn with_last_messages(state: &AppState, sessions: Vec<VisitorSession>, fallback: &str) -> Vec<OnlineVisitor> {
    let ids: Vec<String> = sessions.iter().map(|s| s.id.clone()).collect();
    let last: HashMap<String, String> = match state.router.store().last_messages(&ids).await {
        Ok(records) => records.into_iter().map(|r| (r.visitor_id, r.content)).collect(),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to load last messages");
            HashMap::new()
        }
    };
    sessions
        .into_iter()
        .map(|s| {
            let last_message = last.get(&s.id).cloned().unwrap_or_else(|| fallback.to_string());
            OnlineVisitor {
                uid: s.id,
                name: s.display_name,
                avatar: s.avatar_url,
                last_message,
            }
        })
        .collect()
}

/// `POST /visitor_login`
pub async fn visitor_login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request_id: RequestId,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let client_ip = addr.ip().to_string();
    let previous = state.directory.get(form.visitor_id.trim());

    let profile = match build_profile(&form, &client_ip, user_agent, &state.config.load(), previous.as_ref()) {
        Ok(profile) => profile,
        Err(e) => {
            tracing::info!(request_id = %request_id, to_id = %form.to_id, error = %e, "Visitor login refused");
            return ApiResponse::error(StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    let record = state.directory.upsert_with_extra(profile, form.extra.clone());
    metrics::record_visitor_login();
    tracing::info!(
        request_id = %request_id,
        visitor_id = %record.profile.visitor_id,
        agent = %record.profile.agent_id,
        returning = previous.is_some(),
        "Visitor logged in"
    );
    spawn_notify(
        state.notifier.clone(),
        Arrival::incoming(
            &record.profile.agent_id,
            &record.profile.visitor_id,
            &record.profile.name,
            &record.profile.avatar,
        ),
    );

    ApiResponse::ok(record).into_response()
}

/// `GET /visitor?visitorId=` (agent only)
pub async fn get_visitor(
    State(state): State<AppState>,
    claim: Option<Extension<AgentClaim>>,
    Query(query): Query<VisitorQuery>,
) -> Response {
    if claim.is_none() {
        return unauthorized();
    }
    match state.directory.record(&query.visitor_id) {
        Some(record) => ApiResponse::ok(record).into_response(),
        None => ApiResponse::error(StatusCode::NOT_FOUND, "visitor not found").into_response(),
    }
}

/// `GET /messages?visitorId=`: full history, then mark it read.
pub async fn get_messages(State(state): State<AppState>, Query(query): Query<VisitorQuery>) -> Response {
    let store = state.router.store();
    let history: Vec<MessageRecord> = match store.history(&query.visitor_id).await {
        Ok(history) => history,
        Err(e) => {
            tracing::warn!(visitor_id = %query.visitor_id, error = %e, "Failed to load history");
            return ApiResponse::error(StatusCode::SERVICE_UNAVAILABLE, "history unavailable").into_response();
        }
    };
    if let Err(e) = store.mark_read(&query.visitor_id).await {
        tracing::warn!(visitor_id = %query.visitor_id, error = %e, "Failed to mark history read");
    }
    ApiResponse::ok(history).into_response()
}

/// `GET /visitors_online`: every live visitor plus legacy TCP peers.
pub async fn visitors_online(State(state): State<AppState>) -> Response {
    let sessions = match state.router.registry().snapshot_online_visitors().await {
        Ok(sessions) => sessions,
        Err(e) => return unavailable(e),
    };
    let ws = with_last_messages(&state, sessions, "").await;
    let tcp = state.legacy.list().iter().map(ToString::to_string).collect();
    ApiResponse::ok(OnlineSnapshot { ws, tcp }).into_response()
}

/// `GET /visitors_kefu_online`: the calling agent's live visitors.
pub async fn visitors_kefu_online(State(state): State<AppState>, claim: Option<Extension<AgentClaim>>) -> Response {
    let Some(Extension(claim)) = claim else {
        return unauthorized();
    };
    let sessions = match state.router.registry().snapshot_agent_visitors(&claim.agent_name).await {
        Ok(sessions) => sessions,
        Err(e) => return unavailable(e),
    };
    ApiResponse::ok(with_last_messages(&state, sessions, NEW_VISITOR).await).into_response()
}

/// `GET /clear_online_tcp`
pub async fn clear_online_tcp(State(state): State<AppState>) -> Response {
    let cleared = state.legacy.clear();
    tracing::info!(cleared, "Legacy TCP registry cleared");
    ApiResponse::ok(serde_json::json!({ "cleared": cleared })).into_response()
}

/// `GET /notice?kefu_id=`: greeting shown before the chat opens.
pub async fn notice(State(state): State<AppState>, Query(query): Query<NoticeQuery>) -> Response {
    let config = state.config.load();
    match config.agents.iter().find(|a| a.name == query.kefu_id) {
        Some(agent) => ApiResponse::ok(Notice {
            nickname: if agent.nickname.is_empty() {
                agent.name.clone()
            } else {
                agent.nickname.clone()
            },
            welcome: agent.welcome.clone(),
        })
        .into_response(),
        None => ApiResponse::error(StatusCode::BAD_REQUEST, "user not found").into_response(),
    }
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "ok"
}
