use std::net::IpAddr;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::hub::{RegistryStats, SessionState};
use crate::http::server::AppState;
use crate::net::connection::ConnectionCounts;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub registry: RegistryStats,
    pub sockets: ConnectionCounts,
    pub legacy_tcp: usize,
    pub known_visitors: usize,
    pub blacklisted: usize,
}

#[derive(Debug, Serialize)]
pub struct SessionSummary {
    pub visitor_id: String,
    pub name: String,
    pub agent: String,
    pub state: SessionState,
    pub idle_secs: u64,
    pub client_address: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub ip: IpAddr,
}

#[derive(Debug, Serialize)]
pub struct Changed {
    pub changed: bool,
}

fn hub_unavailable(e: impl std::fmt::Display) -> StatusCode {
    tracing::error!(error = %e, "Registry unavailable");
    StatusCode::SERVICE_UNAVAILABLE
}

pub async fn get_status(State(state): State<AppState>) -> Result<Json<SystemStatus>, StatusCode> {
    let registry = state.router.registry().stats().await.map_err(hub_unavailable)?;
    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        registry,
        sockets: state.connections.counts(),
        legacy_tcp: state.legacy.len(),
        known_visitors: state.directory.len(),
        blacklisted: state.blacklist.list().len(),
    }))
}

pub async fn get_online(State(state): State<AppState>) -> Result<Json<Vec<SessionSummary>>, StatusCode> {
    let sessions = state
        .router
        .registry()
        .snapshot_online_visitors()
        .await
        .map_err(hub_unavailable)?;
    Ok(Json(
        sessions
            .into_iter()
            .map(|s| SessionSummary {
                name: s.display_name.clone(),
                agent: s.assigned_agent_id().to_string(),
                state: s.state,
                idle_secs: s.last_activity.elapsed().as_secs(),
                client_address: s.client_address.map(|a| a.to_string()),
                visitor_id: s.id,
            })
            .collect(),
    ))
}

pub async fn get_tcp(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.legacy.list().iter().map(ToString::to_string).collect())
}

pub async fn clear_tcp(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cleared = state.legacy.clear();
    tracing::info!(cleared, "Legacy TCP registry cleared by admin");
    Json(serde_json::json!({ "cleared": cleared }))
}

pub async fn get_blacklist(State(state): State<AppState>) -> Json<Vec<IpAddr>> {
    Json(state.blacklist.list())
}

pub async fn block_ip(State(state): State<AppState>, Json(body): Json<BlockRequest>) -> Json<Changed> {
    let changed = state.blacklist.block(body.ip);
    tracing::info!(ip = %body.ip, changed, "IP blacklisted");
    Json(Changed { changed })
}

pub async fn unblock_ip(State(state): State<AppState>, Path(ip): Path<IpAddr>) -> Json<Changed> {
    let changed = state.blacklist.unblock(ip);
    tracing::info!(ip = %ip, changed, "IP removed from blacklist");
    Json(Changed { changed })
}
