//! IP blacklist for visitor-facing endpoints.
//!
//! Seeded from `security.ip_blacklist` at startup and edited at runtime
//! through the admin API. Lookups are lock-free reads on a `DashSet`.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashSet;

/// Shared set of refused client IPs.
#[derive(Debug, Clone, Default)]
pub struct IpBlacklist {
    blocked: Arc<DashSet<IpAddr>>,
}

impl IpBlacklist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from config entries. Unparseable entries are skipped
    /// (validation already reports them).
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a String>) -> Self {
        let list = Self::new();
        for ip in entries.into_iter().filter_map(|e| e.parse().ok()) {
            list.block(ip);
        }
        list
    }

    /// Returns `true` if the IP was newly added.
    pub fn block(&self, ip: IpAddr) -> bool {
        self.blocked.insert(ip)
    }

    /// Returns `true` if the IP was present.
    pub fn unblock(&self, ip: IpAddr) -> bool {
        self.blocked.remove(&ip).is_some()
    }

    pub fn is_blocked(&self, ip: &IpAddr) -> bool {
        self.blocked.contains(ip)
    }

    pub fn list(&self) -> Vec<IpAddr> {
        let mut ips: Vec<IpAddr> = self.blocked.iter().map(|ip| *ip).collect();
        ips.sort();
        ips
    }
}

/// Refuse blacklisted peers with 403 before any handler runs.
pub async fn ip_blacklist_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(blacklist): State<IpBlacklist>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if blacklist.is_blocked(&addr.ip()) {
        tracing::warn!(client_ip = %addr.ip(), path = %request.uri().path(), "Blacklisted client refused");
        return (StatusCode::FORBIDDEN, "Forbidden").into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_and_unblock() {
        let list = IpBlacklist::from_entries(&vec!["10.0.0.1".to_string(), "junk".to_string()]);
        let ip: IpAddr = "10.0.0.1".parse().unwrap();
        assert!(list.is_blocked(&ip));
        assert_eq!(list.list(), vec![ip]);

        assert!(!list.block(ip));
        assert!(list.unblock(ip));
        assert!(!list.unblock(ip));
        assert!(!list.is_blocked(&ip));
    }
}
