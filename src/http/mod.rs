//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID)
//!     → handlers.rs (login, presence snapshots, history)
//!       websocket.rs (handshake gate, socket read/write loops)
//!     → response.rs ({code, msg, result} envelope)
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use request::{RequestId, X_REQUEST_ID};
pub use server::{AppState, HttpServer};
