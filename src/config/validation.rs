//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (TTL > 0, sweep interval within TTL)
//! - Check addresses and URLs parse
//! - Detect duplicate agent names and tokens
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: HubConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};

use thiserror::Error;

use crate::config::schema::HubConfig;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },

    #[error("presence.sweep_interval_secs ({interval}) exceeds presence.visitor_ttl_secs ({ttl})")]
    SweepSlowerThanTtl { interval: u64, ttl: u64 },

    #[error("{field} is not a valid socket address: {value}")]
    BadAddress { field: &'static str, value: String },

    #[error("security.ip_blacklist entry is not an IP address: {0}")]
    BadIp(String),

    #[error("notification.webhook_url is invalid: {0}")]
    BadWebhook(String),

    #[error("duplicate agent name: {0}")]
    DuplicateAgent(String),

    #[error("agent {0} shares its token with another agent")]
    DuplicateToken(String),

    #[error("agent {0} has an empty token")]
    EmptyToken(String),
}

fn check_addr(errors: &mut Vec<ValidationError>, field: &'static str, value: &str) {
    if value.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::BadAddress { field, value: value.to_string() });
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &HubConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    let presence = &config.presence;
    for (field, value) in [
        ("presence.visitor_ttl_secs", presence.visitor_ttl_secs),
        ("presence.sweep_interval_secs", presence.sweep_interval_secs),
        ("heartbeat.ping_interval_secs", config.heartbeat.ping_interval_secs),
        ("timeouts.request_secs", config.timeouts.request_secs),
    ] {
        if value == 0 {
            errors.push(ValidationError::Zero { field });
        }
    }
    if presence.sweep_interval_secs > presence.visitor_ttl_secs && presence.visitor_ttl_secs > 0 {
        errors.push(ValidationError::SweepSlowerThanTtl {
            interval: presence.sweep_interval_secs,
            ttl: presence.visitor_ttl_secs,
        });
    }
    if config.persistence.max_in_flight == 0 {
        errors.push(ValidationError::Zero { field: "persistence.max_in_flight" });
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::Zero { field: "listener.max_connections" });
    }

    check_addr(&mut errors, "listener.bind_address", &config.listener.bind_address);
    if config.legacy_tcp.enabled {
        check_addr(&mut errors, "legacy_tcp.bind_address", &config.legacy_tcp.bind_address);
    }
    if config.observability.metrics_enabled {
        check_addr(&mut errors, "observability.metrics_address", &config.observability.metrics_address);
    }

    for ip in &config.security.ip_blacklist {
        if ip.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::BadIp(ip.clone()));
        }
    }

    if let Some(webhook) = &config.notification.webhook_url {
        match url::Url::parse(webhook) {
            Ok(u) if u.scheme() == "http" || u.scheme() == "https" => {}
            Ok(u) => errors.push(ValidationError::BadWebhook(format!("unsupported scheme {}", u.scheme()))),
            Err(e) => errors.push(ValidationError::BadWebhook(e.to_string())),
        }
    }

    let mut names = HashSet::new();
    let mut tokens = HashSet::new();
    for agent in &config.agents {
        if !names.insert(agent.name.as_str()) {
            errors.push(ValidationError::DuplicateAgent(agent.name.clone()));
        }
        if agent.token.is_empty() {
            errors.push(ValidationError::EmptyToken(agent.name.clone()));
        } else if !tokens.insert(agent.token.as_str()) {
            errors.push(ValidationError::DuplicateToken(agent.name.clone()));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
