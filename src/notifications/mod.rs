//! Visitor arrival notifications.
//!
//! # Data Flow
//! ```text
//! POST /visitor_login ──┐
//! visitor socket bound ─┴→ spawn(notify(Arrival)) → LogNotifier | WebhookNotifier
//! ```
//!
//! # Design Decisions
//! - Always fire-and-forget: callers spawn and never await the outcome
//! - Failures are logged, never surfaced to the visitor

mod webhook;

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::config::schema::NotificationConfig;

pub use webhook::WebhookNotifier;

/// What happened, and to whom it should be told.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Arrival {
    pub agent: String,
    pub visitor_id: String,
    pub visitor_name: String,
    pub avatar: String,
    pub message: String,
}

impl Arrival {
    pub fn incoming(agent: &str, visitor_id: &str, visitor_name: &str, avatar: &str) -> Self {
        Self {
            agent: agent.to_string(),
            visitor_id: visitor_id.to_string(),
            visitor_name: visitor_name.to_string(),
            avatar: avatar.to_string(),
            message: format!("{visitor_name} incoming!"),
        }
    }
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("webhook answered {0}")]
    Status(reqwest::StatusCode),
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, arrival: &Arrival) -> Result<(), NotifyError>;
}

/// Writes arrivals to the log only.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, arrival: &Arrival) -> Result<(), NotifyError> {
        tracing::info!(
            agent = %arrival.agent,
            visitor_id = %arrival.visitor_id,
            visitor_name = %arrival.visitor_name,
            "{}",
            arrival.message
        );
        Ok(())
    }
}

/// Discards arrivals (notifications disabled).
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _arrival: &Arrival) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Pick a notifier for the configuration.
pub fn from_config(config: &NotificationConfig) -> Arc<dyn Notifier> {
    match (config.enabled, &config.webhook_url) {
        (false, _) => Arc::new(NoopNotifier),
        (true, Some(url)) => Arc::new(WebhookNotifier::new(url.clone(), config.timeout_secs)),
        (true, None) => Arc::new(LogNotifier),
    }
}

/// Run a notification in the background.
pub fn spawn_notify(notifier: Arc<dyn Notifier>, arrival: Arrival) {
    tokio::spawn(async move {
        if let Err(e) = notifier.notify(&arrival).await {
            tracing::warn!(agent = %arrival.agent, visitor_id = %arrival.visitor_id, error = %e, "Notification failed");
        }
    });
}
