//! TCP listener that hands out connection IDs.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};

use crate::{ConnectionId, TransportError};

/// Counter for generating unique connection IDs.
static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates a fresh [`ConnectionId`], unique for the life of the process.
pub fn next_connection_id() -> ConnectionId {
    ConnectionId::new(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
}

/// Accepts incoming member connections.
#[derive(Debug)]
pub struct GroupListener {
    listener: TcpListener,
}

impl GroupListener {
    /// Binds to `addr` (e.g. `"0.0.0.0:4243"`).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        tracing::info!(addr, "group listener bound");
        Ok(Self { listener })
    }

    /// Waits for the next connection and assigns it an ID.
    pub async fn accept(&self) -> Result<(ConnectionId, TcpStream, SocketAddr), TransportError> {
        let (stream, addr) = self.listener.accept().await?;
        let id = next_connection_id();
        tracing::debug!(%id, %addr, "accepted connection");
        Ok((id, stream, addr))
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}
