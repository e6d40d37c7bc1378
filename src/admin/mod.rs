//! Admin API: hub status, live sessions, legacy TCP reset, IP blacklist.

pub mod auth;
pub mod handlers;

use axum::{
    middleware,
    routing::{delete, get},
    Router,
};

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::http::server::AppState;

pub fn setup_admin_router(state: AppState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/online", get(get_online))
        .route("/admin/tcp", get(get_tcp).delete(clear_tcp))
        .route("/admin/blacklist", get(get_blacklist).post(block_ip))
        .route("/admin/blacklist/{ip}", delete(unblock_ip))
        .layer(middleware::from_fn_with_state(state.config.clone(), admin_auth_middleware))
        .with_state(state)
}
