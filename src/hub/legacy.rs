//! Legacy TCP client tracking.
//!
//! Raw clients that bypass the WebSocket upgrade are only counted here. The
//! set has no session metadata and is never consulted for routing.

use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Set of raw client addresses currently connected.
#[derive(Debug, Clone, Default)]
pub struct LegacyTcpTracker {
    clients: Arc<Mutex<BTreeSet<SocketAddr>>>,
}

impl LegacyTcpTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn clients(&self) -> MutexGuard<'_, BTreeSet<SocketAddr>> {
        // The set stays consistent even if a holder panicked mid-insert
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a client. Returns `false` if it was already tracked.
    pub fn add(&self, address: SocketAddr) -> bool {
        self.clients().insert(address)
    }

    /// Forget a client. Returns `false` if it was not tracked.
    pub fn remove(&self, address: &SocketAddr) -> bool {
        self.clients().remove(address)
    }

    /// Tracked addresses in sorted order.
    pub fn list(&self) -> Vec<SocketAddr> {
        self.clients().iter().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.clients().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients().is_empty()
    }

    /// Drop every tracked address. Returns how many were removed.
    pub fn clear(&self) -> usize {
        let mut clients = self.clients();
        let count = clients.len();
        clients.clear();
        count
    }

    /// Track `address` for as long as the returned guard lives.
    pub fn track(&self, address: SocketAddr) -> LegacyClientGuard {
        self.add(address);
        LegacyClientGuard {
            tracker: self.clone(),
            address,
        }
    }
}

/// Removes its address from the tracker when dropped.
#[derive(Debug)]
pub struct LegacyClientGuard {
    tracker: LegacyTcpTracker,
    address: SocketAddr,
}

impl LegacyClientGuard {
    pub fn address(&self) -> SocketAddr {
        self.address
    }
}

impl Drop for LegacyClientGuard {
    fn drop(&mut self) {
        self.tracker.remove(&self.address);
        tracing::trace!(peer_addr = %self.address, "Legacy client untracked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn add_remove_list_clear() {
        let tracker = LegacyTcpTracker::new();
        assert!(tracker.add(addr(2000)));
        assert!(tracker.add(addr(1000)));
        assert!(!tracker.add(addr(1000)));
        assert_eq!(tracker.list(), vec![addr(1000), addr(2000)]);

        assert!(tracker.remove(&addr(1000)));
        assert!(!tracker.remove(&addr(1000)));
        assert_eq!(tracker.len(), 1);

        assert_eq!(tracker.clear(), 1);
        assert!(tracker.is_empty());
    }

    #[test]
    fn guard_untracks_on_drop() {
        let tracker = LegacyTcpTracker::new();
        let guard = tracker.track(addr(3000));
        assert_eq!(guard.address(), addr(3000));
        assert_eq!(tracker.list(), vec![addr(3000)]);
        drop(guard);
        assert!(tracker.is_empty());
    }
}
