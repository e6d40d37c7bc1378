//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize hub subsystems in dependency order
//! - Start background tasks (sweeper, rate limit pruner, legacy listener,
//!   HTTP server)
//! - Hand back a [`RunningHub`] that can be stopped
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Listeners start last (traffic only when ready)
//! - The caller binds the HTTP socket, so tests can use an ephemeral port

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::SharedConfig;
use crate::hub::PresenceSweeper;
use crate::http::{AppState, HttpServer};
use crate::lifecycle::Shutdown;
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::load_tls_config;
use crate::security::rate_limit::prune_loop;
use crate::store::memory::InMemoryMessageStore;
use crate::store::MessageStore;

const RATE_LIMIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("legacy listener: {0}")]
    Listener(#[from] ListenerError),
}

/// A started hub and the tasks serving it.
pub struct RunningHub {
    pub state: AppState,
    pub http_addr: SocketAddr,
    pub legacy_addr: Option<SocketAddr>,
    shutdown: Shutdown,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningHub {
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Wait until every task has exited (after shutdown was triggered).
    pub async fn wait(self, drain: Duration) {
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Task panicked during shutdown");
            }
        }
        if !self.state.connections.wait_for_drain(drain).await {
            tracing::warn!(
                remaining = self.state.connections.active_count(),
                "Sockets still open after drain deadline"
            );
        }
    }

    /// Trigger shutdown and wait for every task.
    pub async fn stop(self) {
        self.shutdown.trigger();
        self.wait(Duration::from_secs(5)).await;
    }
}

/// Start with the in-memory message store.
pub async fn start(config: SharedConfig, http: TcpListener) -> Result<RunningHub, StartupError> {
    let history_limit = config.load().persistence.history_limit;
    start_with_store(config, http, Arc::new(InMemoryMessageStore::new(history_limit))).await
}

/// Start the hub around a caller-supplied store.
pub async fn start_with_store(
    config: SharedConfig,
    http: TcpListener,
    store: Arc<dyn MessageStore>,
) -> Result<RunningHub, StartupError> {
    let snapshot = config.load_full();
    let shutdown = Shutdown::new();
    let state = AppState::new(config.clone(), store, shutdown.clone());
    let mut tasks = Vec::new();

    let sweeper = PresenceSweeper::new(state.router.clone(), config.clone());
    tasks.push(tokio::spawn(sweeper.run(shutdown.subscribe())));

    if snapshot.rate_limit.enabled {
        let limiters = vec![state.visitor_limiter.clone(), state.agent_limiter.clone()];
        tasks.push(tokio::spawn(prune_loop(limiters, RATE_LIMIT_PRUNE_INTERVAL, shutdown.subscribe())));
    }

    let mut legacy_addr = None;
    if snapshot.legacy_tcp.enabled {
        let listener = Listener::bind(&snapshot.legacy_tcp).await?;
        legacy_addr = Some(listener.local_addr()?);
        tasks.push(tokio::spawn(listener.serve(state.legacy.clone(), shutdown.subscribe())));
    }

    let tls = match &snapshot.listener.tls {
        Some(tls) => Some(load_tls_config(tls).await?),
        None => None,
    };

    let http_addr = http.local_addr()?;
    let server = HttpServer::new(state.clone());
    let server_shutdown = shutdown.subscribe();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = server.run(http, tls, server_shutdown).await {
            tracing::error!(error = %e, "HTTP server failed");
        }
    }));

    tracing::info!(
        http = %http_addr,
        legacy = ?legacy_addr,
        agents = snapshot.agents.len(),
        "Hub started"
    );

    Ok(RunningHub {
        state,
        http_addr,
        legacy_addr,
        shutdown,
        tasks,
    })
}
