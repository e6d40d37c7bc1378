//! Agent identity for console connections and agent-only queries.
//!
//! The hub trusts whatever claim this layer attaches. Tokens come from the
//! `agents` table of the live configuration, so a reload that rotates a
//! token takes effect on the next request.

use axum::{
    body::Body,
    extract::State,
    http::{header, Request},
    middleware::Next,
    response::Response,
};

use crate::config::{HubConfig, SharedConfig};

/// Verified agent identity attached to a request as an extension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentClaim {
    pub agent_name: String,
}

/// Pull a bearer token from the `Authorization` header or the `token` query
/// parameter. Browsers cannot set headers on WebSocket upgrades, hence the
/// query fallback.
pub fn extract_token<B>(request: &Request<B>) -> Option<String> {
    let from_header = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string());
    if from_header.is_some() {
        return from_header;
    }
    let query = request.uri().query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(k, _)| k == "token")
        .map(|(_, v)| v.into_owned())
}

/// Resolve a token against the configured agents.
pub fn resolve(config: &HubConfig, token: &str) -> Option<AgentClaim> {
    config.agent_for_token(token).map(|agent| AgentClaim {
        agent_name: agent.name.clone(),
    })
}

/// Attach an [`AgentClaim`] when the request carries a known token.
///
/// Requests without a valid token pass through unmarked; the handshake gate
/// and agent-only handlers reject them.
pub async fn agent_auth_middleware(
    State(config): State<SharedConfig>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(token) = extract_token(&request) {
        match resolve(&config.load(), &token) {
            Some(claim) => {
                tracing::debug!(agent = %claim.agent_name, "Agent token accepted");
                request.extensions_mut().insert(claim);
            }
            None => tracing::warn!(path = %request.uri().path(), "Unknown agent token"),
        }
    }
    next.run(request).await
}
