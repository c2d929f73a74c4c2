//! Transport layer for mudgroup.
//!
//! Moves opaque frames between group members over TCP, optionally upgraded
//! to TLS:
//!
//! - **Framing** ([`FrameParser`], [`encode_frame`]): `<length> <bytes>`.
//! - **Sockets** ([`GroupSocket`]): dial, read/write frames, TLS upgrade,
//!   certificate fingerprint.
//! - **Connection tasks** ([`spawn_connection`]): one task per socket that
//!   also runs the login/info timeout.
//! - **TLS** ([`TlsContext`], [`Secret`]): self-signed identities, trust
//!   decided by the caller.
//!
//! This crate knows nothing about message contents; it hands bytes up to
//! the protocol layer.

mod connection;
mod error;
mod frame;
mod listener;
mod socket;
mod tls;

pub use connection::{
    spawn_connection, ConnectTarget, ConnectionEvent, ConnectionHandle, ConnectionOptions,
    SocketCommand, SocketEvent,
};
pub use error::{FrameError, TransportError};
pub use frame::{encode_frame, FrameParser, DEFAULT_MAX_FRAME_LEN};
pub use listener::{next_connection_id, GroupListener};
pub use socket::{GroupSocket, ProtocolState};
pub use tls::{der_to_pem, PeerIdentity, Secret, TlsContext, TlsIdentity};

use std::fmt;

/// Opaque identifier for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Creates a new `ConnectionId` from a raw `u64`.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the underlying `u64` value.
    pub fn into_inner(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
