//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the shared [`AppState`] (registry, router, directory, trackers)
//! - Create the Axum Router with all handlers
//! - Wire up middleware (blacklist, rate limit, agent auth, tracing,
//!   request ID, timeout, body limit)
//! - Serve plain or TLS until shutdown
//!
//! # Route Map
//! ```text
//! visitor  (blacklist, rate limit)  POST /visitor_login   GET /ws_visitor
//! agent    (token → AgentClaim)     GET  /ws_kefu  /visitors_kefu_online  /visitor
//! public                            GET  /visitors_online  /messages  /notice
//!                                        /clear_online_tcp  /healthz
//! admin    (bearer API key)         /admin/*
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::admin::setup_admin_router;
use crate::config::{HubConfig, SharedConfig};
use crate::hub::{HandshakeGate, LegacyTcpTracker, MessageRouter, RegistryHandle};
use crate::http::request::{propagate_request_id_layer, set_request_id_layer};
use crate::http::{handlers, websocket};
use crate::lifecycle::Shutdown;
use crate::net::ConnectionTracker;
use crate::notifications::{self, Notifier};
use crate::observability::tracing::request_span;
use crate::security::agent_auth::agent_auth_middleware;
use crate::security::ip_blacklist::{ip_blacklist_middleware, IpBlacklist};
use crate::security::rate_limit::{rate_limit_middleware, RateLimiterState};
use crate::store::{MessageStore, PersistenceGate};
use crate::visitors::VisitorDirectory;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    pub router: MessageRouter,
    pub gate: HandshakeGate,
    pub directory: VisitorDirectory,
    pub legacy: LegacyTcpTracker,
    pub connections: ConnectionTracker,
    pub blacklist: IpBlacklist,
    pub visitor_limiter: Arc<RateLimiterState>,
    pub agent_limiter: Arc<RateLimiterState>,
    pub notifier: Arc<dyn Notifier>,
    pub shutdown: Shutdown,
    pub started_at: Instant,
}

impl AppState {
    /// Spawn the registry and assemble the hub around `store`.
    pub fn new(config: SharedConfig, store: Arc<dyn MessageStore>, shutdown: Shutdown) -> Self {
        let snapshot = config.load_full();
        let router = MessageRouter::new(
            RegistryHandle::spawn(),
            store,
            PersistenceGate::new(snapshot.persistence.max_in_flight),
        );
        let directory = VisitorDirectory::new();
        Self {
            gate: HandshakeGate::new(router.clone(), directory.clone()),
            router,
            directory,
            legacy: LegacyTcpTracker::default(),
            connections: ConnectionTracker::new(),
            blacklist: IpBlacklist::from_entries(&snapshot.security.ip_blacklist),
            visitor_limiter: RateLimiterState::new(&snapshot.rate_limit, "visitor"),
            agent_limiter: RateLimiterState::new(&snapshot.rate_limit, "agent"),
            notifier: notifications::from_config(&snapshot.notification),
            shutdown,
            started_at: Instant::now(),
            config,
        }
    }
}

/// HTTP server for the hub.
pub struct HttpServer {
    router: Router,
    state: AppState,
}

impl HttpServer {
    /// Create a new HTTP server around the given state.
    pub fn new(state: AppState) -> Self {
        let config = state.config.load_full();
        let router = Self::build_router(&config, state.clone());
        Self { router, state }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &HubConfig, state: AppState) -> Router {
        let mut visitor_routes = Router::new()
            .route("/visitor_login", post(handlers::visitor_login))
            .route("/ws_visitor", get(websocket::ws_visitor));
        let mut agent_upgrade = Router::new().route("/ws_kefu", get(websocket::ws_kefu));

        if config.rate_limit.enabled {
            visitor_routes = visitor_routes.layer(middleware::from_fn_with_state(
                state.visitor_limiter.clone(),
                rate_limit_middleware,
            ));
            agent_upgrade = agent_upgrade.layer(middleware::from_fn_with_state(
                state.agent_limiter.clone(),
                rate_limit_middleware,
            ));
        }
        let visitor_routes = visitor_routes.layer(middleware::from_fn_with_state(
            state.blacklist.clone(),
            ip_blacklist_middleware,
        ));

        let agent_routes = agent_upgrade
            .route("/visitors_kefu_online", get(handlers::visitors_kefu_online))
            .route("/visitor", get(handlers::get_visitor))
            .layer(middleware::from_fn_with_state(
                state.config.clone(),
                agent_auth_middleware,
            ));

        let public_routes = Router::new()
            .route("/visitors_online", get(handlers::visitors_online))
            .route("/messages", get(handlers::get_messages))
            .route("/notice", get(handlers::notice))
            .route("/clear_online_tcp", get(handlers::clear_online_tcp))
            .route("/healthz", get(handlers::healthz));

        let mut app = Router::new()
            .merge(visitor_routes)
            .merge(agent_routes)
            .merge(public_routes)
            .with_state(state.clone());

        if config.admin.enabled {
            app = app.merge(setup_admin_router(state));
        }

        app.layer(
            ServiceBuilder::new()
                .layer(set_request_id_layer())
                .layer(propagate_request_id_layer())
                .layer(TraceLayer::new_for_http().make_span_with(request_span))
                .layer(RequestBodyLimitLayer::new(config.security.max_body_size))
                .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs))),
        )
    }

    /// Serve on `listener` until shutdown, with TLS when `tls` is set.
    pub async fn run(
        self,
        listener: TcpListener,
        tls: Option<RustlsConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, tls = tls.is_some(), "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        match tls {
            None => {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        let _ = shutdown.recv().await;
                    })
                    .await?;
            }
            Some(tls) => {
                let handle = axum_server::Handle::new();
                let signal = handle.clone();
                tokio::spawn(async move {
                    let _ = shutdown.recv().await;
                    signal.graceful_shutdown(Some(Duration::from_secs(10)));
                });
                axum_server::from_tcp_rustls(listener.into_std()?, tls)
                    .handle(handle)
                    .serve(app)
                    .await?;
            }
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }
}
