//! Raw TCP listener for legacy clients.
//!
//! # Responsibilities
//! - Bind the legacy address
//! - Enforce max_connections via semaphore
//! - Record each peer in the [`LegacyTcpTracker`] for as long as it stays connected
//!
//! # Design Decisions
//! - Bytes sent by legacy clients are read and discarded; the socket is only
//!   a presence marker listed by `/visitors_online`
//! - Accept errors are logged and the loop keeps going

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};

use crate::config::schema::LegacyTcpConfig;
use crate::hub::LegacyTcpTracker;

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    /// Failed to accept connection.
    #[error("Failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    /// The connection semaphore was closed.
    #[error("Listener is closed")]
    Closed,
}

/// A bounded TCP listener that limits concurrent connections.
///
/// When the limit is reached, new connections wait until a slot frees up.
pub struct Listener {
    inner: TcpListener,
    connection_limit: Arc<Semaphore>,
    max_connections: usize,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &LegacyTcpConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr = config
            .bind_address
            .parse()
            .map_err(|e| ListenerError::Bind(std::io::Error::new(std::io::ErrorKind::InvalidInput, e)))?;

        let listener = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = listener.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Legacy TCP listener bound"
        );

        Ok(Self {
            inner: listener,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
            max_connections: config.max_connections,
        })
    }

    /// Accept a new connection, respecting the connection limit.
    ///
    /// The returned permit must be held for the connection's lifetime.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionPermit), ListenerError> {
        let permit = self
            .connection_limit
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::Closed)?;

        let (stream, addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;

        tracing::debug!(
            peer_addr = %addr,
            available_permits = self.connection_limit.available_permits(),
            "Legacy connection accepted"
        );

        Ok((stream, addr, ConnectionPermit { _permit: permit }))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Get current available connection slots.
    pub fn available_permits(&self) -> usize {
        self.connection_limit.available_permits()
    }

    /// Get configured maximum connections.
    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Accept legacy clients until shutdown, tracking each one while connected.
    pub async fn serve(self, tracker: LegacyTcpTracker, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accepted = self.accept() => match accepted {
                    Ok((stream, addr, permit)) => {
                        let guard = tracker.track(addr);
                        tokio::spawn(async move {
                            drain(stream).await;
                            drop(guard);
                            drop(permit);
                            tracing::debug!(peer_addr = %addr, "Legacy connection closed");
                        });
                    }
                    Err(ListenerError::Closed) => break,
                    Err(e) => tracing::warn!(error = %e, "Legacy accept failed"),
                },
                _ = shutdown.recv() => break,
            }
        }
        tracing::info!("Legacy TCP listener stopped");
    }
}

/// Read and discard until EOF or error.
async fn drain(mut stream: TcpStream) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

/// A permit representing a connection slot.
///
/// Dropping it releases the slot, even if the handler panics.
#[derive(Debug)]
pub struct ConnectionPermit {
    _permit: OwnedSemaphorePermit,
}
