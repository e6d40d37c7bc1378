//! Live chat presence and message-routing hub.

pub mod admin;
pub mod config;
pub mod http;
pub mod hub;
pub mod lifecycle;
pub mod net;
pub mod notifications;
pub mod observability;
pub mod security;
pub mod store;
pub mod visitors;

pub use config::schema::HubConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
