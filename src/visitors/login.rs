//! Turning a login form into a visitor profile.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Deserialize;
use thiserror::Error;
use uuid::Uuid;

use crate::config::HubConfig;
use crate::hub::session::VisitorProfile;

pub const DEFAULT_NAME: &str = "Guest";
pub const MOBILE_AVATAR: &str = "/static/images/1.png";
pub const DESKTOP_AVATAR: &str = "/static/images/2.png";

const MOBILE_MARKERS: [&str; 6] = ["Android", "iPhone", "iPad", "iPod", "Windows Phone", "Mobile"];

/// `POST /visitor_login` form body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    pub to_id: String,
    #[serde(default)]
    pub visitor_id: String,
    #[serde(default)]
    pub refer: String,
    /// Base64 JSON carrying `visitorName` / `visitorAvatar`.
    #[serde(default)]
    pub extra: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VisitorExtra {
    #[serde(default)]
    visitor_name: String,
    #[serde(default)]
    visitor_avatar: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoginError {
    #[error("missing agent id")]
    MissingAgent,

    #[error("The customer service account does not exist")]
    UnknownAgent(String),
}

pub fn is_mobile(user_agent: &str) -> bool {
    MOBILE_MARKERS.iter().any(|m| user_agent.contains(m))
}

/// Decode the `extra` field. Malformed input is ignored.
fn decode_extra(extra: &str) -> VisitorExtra {
    if extra.is_empty() {
        return VisitorExtra::default();
    }
    STANDARD
        .decode(extra.trim())
        .ok()
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
        .unwrap_or_default()
}

/// Build the profile for a login, or refuse it.
///
/// `previous` is the visitor's existing profile, if any; its avatar is kept
/// unless the login supplies a new one.
pub fn build_profile(
    form: &LoginForm,
    client_ip: &str,
    user_agent: &str,
    config: &HubConfig,
    previous: Option<&VisitorProfile>,
) -> Result<VisitorProfile, LoginError> {
    let agent = form.to_id.trim();
    if agent.is_empty() {
        return Err(LoginError::MissingAgent);
    }
    if !config.has_agent(agent) {
        return Err(LoginError::UnknownAgent(agent.to_string()));
    }

    let visitor_id = match form.visitor_id.trim() {
        "" => Uuid::new_v4().to_string(),
        id => id.to_string(),
    };

    let extra = decode_extra(&form.extra);
    let name = if extra.visitor_name.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        extra.visitor_name
    };
    let avatar = if !extra.visitor_avatar.is_empty() {
        extra.visitor_avatar
    } else if let Some(prev) = previous {
        prev.avatar.clone()
    } else if is_mobile(user_agent) {
        MOBILE_AVATAR.to_string()
    } else {
        DESKTOP_AVATAR.to_string()
    };

    Ok(VisitorProfile {
        visitor_id,
        name,
        avatar,
        agent_id: agent.to_string(),
        client_ip: client_ip.to_string(),
        refer: form.refer.clone(),
        city: previous.map(|p| p.city.clone()).unwrap_or_default(),
    })
}
