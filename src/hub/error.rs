//! Hub error types.

use thiserror::Error;

use crate::net::connection::ConnectionId;

/// Errors surfaced by the registry handle.
#[derive(Debug, Error)]
pub enum HubError {
    /// The registry actor has stopped; the hub is shutting down.
    #[error("connection registry is closed")]
    RegistryClosed,

    /// The connection handle is already registered under another identity.
    #[error("{0} is already bound to another identity")]
    ConnectionAlreadyBound(ConnectionId),
}

/// A write to a connection failed. Treated exactly like a disconnect.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("{0} is closed")]
pub struct DeliveryError(pub ConnectionId);
