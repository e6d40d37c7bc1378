//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define hub metrics (connections, routing, persistence, expiry)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `hub_connections_active` (gauge, labels: role): live sockets
//! - `hub_visitors_online` (gauge): registered visitor sessions
//! - `hub_agent_connections` (gauge): registered agent sockets
//! - `hub_events_routed_total` (counter, labels: kind)
//! - `hub_deliveries_total` (counter, labels: kind): sockets written
//! - `hub_persist_failures_total` (counter)
//! - `hub_sessions_expired_total` (counter)
//! - `hub_handshake_rejected_total` (counter, labels: reason)
//! - `hub_rate_limited_total` (counter, labels: endpoint)
//! - `hub_visitor_logins_total` (counter)
//!
//! # Design Decisions
//! - Recording is a no-op until a recorder is installed, so tests need no setup
//! - Label values are static strings to bound cardinality

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

pub const CONNECTIONS_ACTIVE: &str = "hub_connections_active";
pub const VISITORS_ONLINE: &str = "hub_visitors_online";
pub const AGENT_CONNECTIONS: &str = "hub_agent_connections";
pub const EVENTS_ROUTED_TOTAL: &str = "hub_events_routed_total";
pub const DELIVERIES_TOTAL: &str = "hub_deliveries_total";
pub const PERSIST_FAILURES_TOTAL: &str = "hub_persist_failures_total";
pub const SESSIONS_EXPIRED_TOTAL: &str = "hub_sessions_expired_total";
pub const HANDSHAKE_REJECTED_TOTAL: &str = "hub_handshake_rejected_total";
pub const RATE_LIMITED_TOTAL: &str = "hub_rate_limited_total";
pub const VISITOR_LOGINS_TOTAL: &str = "hub_visitor_logins_total";

/// Install the Prometheus recorder and its HTTP scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_connections(role: &'static str, active: u64) {
    gauge!(CONNECTIONS_ACTIVE, "role" => role).set(active as f64);
}

pub fn record_registry(visitors: usize, agent_connections: usize) {
    gauge!(VISITORS_ONLINE).set(visitors as f64);
    gauge!(AGENT_CONNECTIONS).set(agent_connections as f64);
}

pub fn record_routed(kind: &'static str, delivered: usize) {
    counter!(EVENTS_ROUTED_TOTAL, "kind" => kind).increment(1);
    counter!(DELIVERIES_TOTAL, "kind" => kind).increment(delivered as u64);
}

pub fn record_persist_failure() {
    counter!(PERSIST_FAILURES_TOTAL).increment(1);
}

pub fn record_expired(count: usize) {
    counter!(SESSIONS_EXPIRED_TOTAL).increment(count as u64);
}

pub fn record_handshake_rejected(reason: &'static str) {
    counter!(HANDSHAKE_REJECTED_TOTAL, "reason" => reason).increment(1);
}

pub fn record_rate_limited(endpoint: &'static str) {
    counter!(RATE_LIMITED_TOTAL, "endpoint" => endpoint).increment(1);
}

pub fn record_visitor_login() {
    counter!(VISITOR_LOGINS_TOTAL).increment(1);
}
