//! Pieces shared by the host and peer actors.
//!
//! Both roles run the same shape of actor: one Tokio task that owns the
//! connection handles, reads [`ConnectionEvent`](mudgroup_transport::ConnectionEvent)s
//! from the transport, and reads [`NetworkCommand`]s from the facade. The
//! roster is the only state shared with the rest of the application.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;

use mudgroup_protocol::{decode_message, encode_message, CharacterFields, JsonCodec, Message};
use mudgroup_roster::{Roster, RosterError, Scheduled};
use mudgroup_transport::{ConnectionHandle, ConnectionId, TlsContext};
use mudgroup_trust::TrustStore;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::SharedConfig;
use crate::events::EventSink;
use crate::GroupError;

/// Which role the local member plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum GroupMode {
    #[default]
    Off,
    Host,
    Peer,
}

impl fmt::Display for GroupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Off => "off",
            Self::Host => "host",
            Self::Peer => "peer",
        };
        f.write_str(name)
    }
}

/// What every engine task shares with the facade.
#[derive(Debug, Clone)]
pub(crate) struct Shared {
    pub(crate) config: SharedConfig,
    pub(crate) roster: Roster,
    pub(crate) trust: Arc<TrustStore>,
    pub(crate) events: EventSink,
}

impl Shared {
    /// TLS acceptor and connector presenting the current local identity.
    pub(crate) fn tls_context(&self) -> Result<TlsContext, GroupError> {
        let identity = self.trust.local_identity().tls_identity()?;
        Ok(TlsContext::new(&identity)?)
    }
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Requests from the facade to a running host or peer.
#[derive(Debug)]
pub(crate) enum NetworkCommand {
    /// Self changed; tell the group.
    SelfUpdate(CharacterFields),
    GroupTell(String),
    /// Self was renamed.
    Rename { old: String, new: String },
    /// Host only.
    Kick(String),
    /// Close everything and end the task. `ack` fires once the roster is
    /// back to self-only.
    Stop { ack: oneshot::Sender<()> },
}

/// The facade's grip on a running engine task.
#[derive(Debug)]
pub(crate) struct NetworkHandle {
    pub(crate) mode: GroupMode,
    pub(crate) commands: mpsc::UnboundedSender<NetworkCommand>,
    pub(crate) task: JoinHandle<()>,
    /// Host only: where the listener ended up.
    pub(crate) local_addr: Option<SocketAddr>,
}

impl NetworkHandle {
    /// Returns `false` if the task has already ended.
    pub(crate) fn send(&self, command: NetworkCommand) -> bool {
        self.commands.send(command).is_ok()
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.task.is_finished() && !self.commands.is_closed()
    }

    /// Asks the task to stop and waits until it has.
    pub(crate) async fn stop(self) {
        let (ack, done) = oneshot::channel();
        if self.commands.send(NetworkCommand::Stop { ack }).is_ok() {
            let _ = done.await;
        }
        if let Err(e) = self.task.await {
            tracing::error!(mode = %self.mode, error = %e, "network task failed");
        }
    }
}

// ---------------------------------------------------------------------------
// Message helpers
// ---------------------------------------------------------------------------

/// Encodes `message` into a frame payload.
pub(crate) fn encode(message: &Message) -> Option<Vec<u8>> {
    match encode_message(&JsonCodec, message) {
        Ok(bytes) => Some(bytes),
        Err(e) => {
            tracing::error!(kind = %message.kind(), error = %e, "failed to encode message");
            None
        }
    }
}

/// Encodes and sends `message` on `handle`.
pub(crate) fn send(handle: &ConnectionHandle, message: &Message) {
    tracing::trace!(id = %handle.id(), kind = %message.kind(), "send");
    if let Some(bytes) = encode(message) {
        handle.send(bytes);
    }
}

/// Decodes one frame. Undecodable frames are logged and skipped.
pub(crate) fn decode(id: ConnectionId, frame: &[u8]) -> Option<Message> {
    match decode_message(&JsonCodec, frame) {
        Ok(message) => {
            tracing::trace!(%id, kind = %message.kind(), "received");
            Some(message)
        }
        Err(e) => {
            tracing::warn!(%id, error = %e, "dropping undecodable frame");
            None
        }
    }
}

pub(crate) fn has_whitespace(name: &str) -> bool {
    name.chars().any(char::is_whitespace)
}

/// Reports whether a roster command was applied or queued.
///
/// Ordinary rejections are already logged by the roster. A closed roster
/// means the engine outlived its facade.
pub(crate) fn accepted(result: Result<Scheduled, RosterError>) -> bool {
    match result {
        Ok(scheduled) => scheduled.is_accepted(),
        Err(e) => {
            tracing::error!(error = %e, "roster unavailable");
            false
        }
    }
}
