//! Presence sweeper: periodic eviction of idle visitor sessions.
//!
//! # Responsibilities
//! - Wake on the configured sweep interval
//! - Evict visitor sessions idle longer than the configured TTL
//! - Close evicted connections and tell their agents the visitor left
//!
//! # Design Decisions
//! - Eviction runs as one registry command, so renewals processed before the
//!   pass are always observed and renewals after it cannot be undone by it
//! - TTL and interval are re-read from the live config on every pass

use std::time::Duration;

use tokio::sync::broadcast;

use crate::config::SharedConfig;
use crate::hub::router::{Dispatch, MessageRouter};
use crate::hub::session::CLOSE_EXPIRED;
use crate::observability::metrics;

pub struct PresenceSweeper {
    router: MessageRouter,
    config: SharedConfig,
}

impl PresenceSweeper {
    pub fn new(router: MessageRouter, config: SharedConfig) -> Self {
        Self { router, config }
    }

    fn ttl(&self) -> Duration {
        Duration::from_secs(self.config.load().presence.visitor_ttl_secs)
    }

    fn interval(&self) -> Duration {
        Duration::from_secs(self.config.load().presence.sweep_interval_secs)
    }

    /// Run until shutdown is signalled.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!(
            ttl_secs = self.ttl().as_secs(),
            interval_secs = self.interval().as_secs(),
            "Presence sweeper starting"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval()) => {
                    self.sweep_once().await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Presence sweeper received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    /// One sweep pass. Returns how many sessions were evicted.
    pub async fn sweep_once(&self) -> usize {
        let expired = match self.router.registry().expire_idle(self.ttl()).await {
            Ok(expired) => expired,
            Err(e) => {
                tracing::warn!(error = %e, "Sweep skipped");
                return 0;
            }
        };

        for session in &expired {
            session.connection.close(CLOSE_EXPIRED, "session expired");
            tracing::info!(
                visitor_id = %session.id,
                agent = %session.assigned_agent_id(),
                "Visitor session expired"
            );
            self.router
                .route(Dispatch::presence(session.assigned_agent_id(), session.offline_event()))
                .await;
        }

        if !expired.is_empty() {
            metrics::record_expired(expired.len());
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use arc_swap::ArcSwap;
    use tokio::sync::mpsc;

    use crate::config::HubConfig;
    use crate::hub::event::ChatEvent;
    use crate::hub::registry::RegistryHandle;
    use crate::hub::session::{ConnectionHandle, Outbound, VisitorProfile, VisitorSession};
    use crate::store::memory::InMemoryMessageStore;
    use crate::store::PersistenceGate;

    fn setup(ttl: u64, interval: u64) -> (MessageRouter, PresenceSweeper) {
        let mut config = HubConfig::default();
        config.presence.visitor_ttl_secs = ttl;
        config.presence.sweep_interval_secs = interval;
        let shared: SharedConfig = Arc::new(ArcSwap::from_pointee(config));
        let router = MessageRouter::new(
            RegistryHandle::spawn(),
            Arc::new(InMemoryMessageStore::new(10)),
            PersistenceGate::new(1),
        );
        (router.clone(), PresenceSweeper::new(router, shared))
    }

    async fn add_visitor(router: &MessageRouter, id: &str) -> mpsc::UnboundedReceiver<Outbound> {
        let (handle, rx) = ConnectionHandle::new();
        let profile = VisitorProfile {
            visitor_id: id.into(),
            name: "Guest".into(),
            avatar: "a.png".into(),
            agent_id: "kefu1".into(),
            client_ip: "127.0.0.1".into(),
            refer: String::new(),
            city: String::new(),
        };
        router
            .registry()
            .register_visitor(VisitorSession::new(&profile, handle, None))
            .await
            .unwrap();
        rx
    }

    #[tokio::test(start_paused = true)]
    async fn expired_visitor_announced_to_every_agent_connection() {
        let (router, sweeper) = setup(60, 10);
        let mut v1 = add_visitor(&router, "v1").await;
        let (a, mut rx_a) = ConnectionHandle::new();
        let (b, mut rx_b) = ConnectionHandle::new();
        router.registry().register_agent("kefu1", a).await.unwrap();
        router.registry().register_agent("kefu1", b).await.unwrap();

        assert_eq!(sweeper.sweep_once().await, 0);
        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(sweeper.sweep_once().await, 1);

        for rx in [&mut rx_a, &mut rx_b] {
            assert_eq!(
                rx.try_recv(),
                Ok(Outbound::Event(ChatEvent::UserOffline { uid: "v1".into() }))
            );
        }
        assert_eq!(
            v1.try_recv(),
            Ok(Outbound::Close { code: CLOSE_EXPIRED, reason: "session expired" })
        );
        assert!(router.registry().lookup_visitor("v1").await.unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn renewed_session_survives() {
        let (router, sweeper) = setup(60, 10);
        let _v1 = add_visitor(&router, "v1").await;

        tokio::time::advance(Duration::from_secs(59)).await;
        router.registry().touch_visitor("v1").await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(sweeper.sweep_once().await, 0);
        assert!(router.registry().lookup_visitor("v1").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_sweeps_until_shutdown() {
        let (router, sweeper) = setup(5, 1);
        let _v1 = add_visitor(&router, "v1").await;
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(sweeper.run(shutdown_rx));

        tokio::time::sleep(Duration::from_secs(8)).await;
        assert!(router.registry().lookup_visitor("v1").await.unwrap().is_none());

        shutdown_tx.send(()).unwrap();
        task.await.unwrap();
    }
}
