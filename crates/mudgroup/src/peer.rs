//! The peer actor: dials the host, logs in, mirrors the host's roster.
//!
//! One connection at a time. When it drops, the peer retries up to
//! `reconnect_attempts` times; reaching `LoggedIn` refills the budget.
//! Being kicked, or refusing the host's identity, ends the actor without
//! a retry.

use std::net::SocketAddr;
use std::ops::ControlFlow;

use chrono::Utc;
use mudgroup_protocol::{CharacterFields, CharacterUpdate, Message, ProtocolVersion};
use mudgroup_transport::{
    next_connection_id, spawn_connection, ConnectTarget, ConnectionEvent, ConnectionHandle,
    PeerIdentity, ProtocolState, SocketEvent, TlsContext, TransportError,
};
use mudgroup_trust::LoginRecord;
use tokio::sync::mpsc;

use crate::engine::{self, GroupMode, NetworkCommand, NetworkHandle, Shared};
use crate::{GroupError, GroupEvent};

/// Spawns the peer actor, which dials immediately.
pub(crate) fn spawn_peer(shared: Shared) -> Result<NetworkHandle, GroupError> {
    let tls = shared.tls_context()?;
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let (conn_tx, conn_rx) = mpsc::unbounded_channel();
    let attempts_left = shared.config.read().reconnect_attempts;

    let actor = PeerActor {
        shared,
        tls,
        commands: commands_rx,
        conn_tx,
        conn_rx,
        link: None,
        attempt: 0,
        attempts_left,
    };
    let task = tokio::spawn(actor.run());
    Ok(NetworkHandle {
        mode: GroupMode::Peer,
        commands: commands_tx,
        task,
        local_addr: None,
    })
}

/// The current connection to the host.
struct Link {
    handle: ConnectionHandle,
    state: ProtocolState,
    peer_addr: Option<SocketAddr>,
    /// The version this peer asked for.
    proposed: ProtocolVersion,
    /// Held until `Closed` so the report names the cause.
    error: Option<TransportError>,
}

struct PeerActor {
    shared: Shared,
    tls: TlsContext,
    commands: mpsc::UnboundedReceiver<NetworkCommand>,
    conn_tx: mpsc::UnboundedSender<ConnectionEvent>,
    conn_rx: mpsc::UnboundedReceiver<ConnectionEvent>,
    link: Option<Link>,
    /// Dials made since the budget was last refilled.
    attempt: u32,
    attempts_left: u32,
}

impl PeerActor {
    async fn run(mut self) {
        tracing::info!("peer actor started");
        self.dial();

        loop {
            tokio::select! {
                biased;
                cmd = self.commands.recv() => match cmd {
                    Some(NetworkCommand::Stop { ack }) => {
                        self.close();
                        let _ = ack.send(());
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        self.close();
                        break;
                    }
                },
                Some(event) = self.conn_rx.recv() => {
                    if self.handle_connection_event(event).is_break() {
                        self.close();
                        break;
                    }
                }
            }
        }

        self.shared.events.emit(GroupEvent::NetworkDown);
        tracing::info!("peer actor stopped");
    }

    fn dial(&mut self) {
        self.attempt += 1;
        let (host, port, options) = {
            let config = self.shared.config.read();
            (config.host.clone(), config.remote_port, config.connection_options())
        };
        self.shared.events.emit(GroupEvent::Connecting {
            attempt: self.attempt,
        });
        self.shared
            .events
            .log(format!("Connecting to {host} on port {port}..."));

        let handle = spawn_connection(
            next_connection_id(),
            ConnectTarget::Dial { host, port },
            Some(self.tls.clone()),
            options,
            self.conn_tx.clone(),
        );
        self.link = Some(Link {
            handle,
            state: ProtocolState::Unconnected,
            peer_addr: None,
            proposed: ProtocolVersion::default(),
            error: None,
        });
    }

    fn close(&mut self) {
        if let Some(link) = self.link.take() {
            link.handle.close();
        }
        engine::accepted(self.shared.roster.reset_to_self_only());
    }

    fn send(&self, message: &Message) {
        if let Some(link) = &self.link {
            engine::send(&link.handle, message);
        }
    }

    fn set_state(&mut self, state: ProtocolState) {
        if let Some(link) = &mut self.link {
            link.state = state;
            link.handle.set_state(state);
        }
    }

    // -----------------------------------------------------------------------
    // Commands from the facade
    // -----------------------------------------------------------------------

    fn handle_command(&mut self, cmd: NetworkCommand) {
        let logged_in = self
            .link
            .as_ref()
            .is_some_and(|l| l.state == ProtocolState::LoggedIn);
        match cmd {
            NetworkCommand::Stop { ack } => {
                // Handled in the run loop.
                let _ = ack.send(());
            }
            NetworkCommand::Kick(name) => {
                tracing::debug!(%name, "peers cannot kick, ignoring");
            }
            _ if !logged_in => {
                tracing::trace!("not logged in, dropping outbound update");
            }
            NetworkCommand::SelfUpdate(fields) => {
                self.send(&Message::UpdateChar(CharacterUpdate::update(fields)));
            }
            NetworkCommand::GroupTell(text) => {
                let from = self.shared.roster.self_name();
                self.send(&Message::GroupTell { from, text });
            }
            NetworkCommand::Rename { old, new } => {
                self.send(&Message::RenameChar {
                    old_name: old,
                    new_name: new,
                });
            }
        }
    }

    // -----------------------------------------------------------------------
    // Connection events
    // -----------------------------------------------------------------------

    fn handle_connection_event(&mut self, event: ConnectionEvent) -> ControlFlow<()> {
        let ConnectionEvent { id, event } = event;
        let Some(link) = self.link.as_mut().filter(|l| l.handle.id() == id) else {
            tracing::trace!(%id, "event from a previous connection");
            return ControlFlow::Continue(());
        };
        match event {
            SocketEvent::Connected { peer_addr } => {
                link.peer_addr = peer_addr;
                self.set_state(ProtocolState::AwaitingLogin);
                self.shared
                    .events
                    .log("Connection established, waiting for the host's handshake.");
                ControlFlow::Continue(())
            }
            SocketEvent::Frame(frame) => match engine::decode(id, &frame) {
                Some(message) => self.handle_message(message),
                None => ControlFlow::Continue(()),
            },
            SocketEvent::Encrypted(identity) => self.on_encrypted(identity),
            SocketEvent::Error(e) => {
                tracing::debug!(%id, error = %e, "connection error");
                link.error = Some(e);
                ControlFlow::Continue(())
            }
            SocketEvent::Closed => self.on_closed(),
        }
    }

    fn on_closed(&mut self) -> ControlFlow<()> {
        let Some(link) = self.link.take() else {
            return ControlFlow::Continue(());
        };
        let (host, port) = {
            let config = self.shared.config.read();
            (config.host.clone(), config.remote_port)
        };
        let reason = match link.error {
            Some(TransportError::ConnectionRefused { .. }) => {
                format!("Connection refused: Tried to connect to {host} on port {port}.")
            }
            Some(TransportError::HostNotFound { .. }) => {
                format!("Connection refused: Host {host} not found.")
            }
            Some(e) => format!("Connection error: {e}."),
            None if link.state != ProtocolState::Unconnected => {
                "Server closed the connection".to_string()
            }
            None => "Connection closed".to_string(),
        };
        if self.attempts_left == 0 {
            self.shared.events.warning(reason);
        } else {
            self.shared.events.log(reason);
        }
        self.try_reconnect()
    }

    fn try_reconnect(&mut self) -> ControlFlow<()> {
        if self.attempts_left == 0 {
            self.shared.events.log("Exhausted reconnect attempts.");
            self.shared.events.emit(GroupEvent::ReconnectsExhausted);
            return ControlFlow::Break(());
        }
        self.attempts_left -= 1;
        self.shared.events.log(format!(
            "Attempting to reconnect... ({} left)",
            self.attempts_left
        ));
        engine::accepted(self.shared.roster.reset_to_self_only());
        self.dial();
        ControlFlow::Continue(())
    }

    fn handle_message(&mut self, message: Message) -> ControlFlow<()> {
        if let Message::StateKicked { reason } = &message {
            self.shared
                .events
                .warning(format!("You got kicked! Reason: {reason}"));
            self.shared.events.emit(GroupEvent::Kicked {
                reason: reason.clone(),
            });
            return ControlFlow::Break(());
        }
        let Some(state) = self.link.as_ref().map(|l| l.state) else {
            return ControlFlow::Continue(());
        };
        match state {
            ProtocolState::Unconnected => {
                tracing::debug!(kind = %message.kind(), "message before connect, ignoring");
                ControlFlow::Continue(())
            }
            ProtocolState::AwaitingLogin => self.on_awaiting_login(message),
            ProtocolState::AwaitingInfo => {
                self.on_awaiting_info(message);
                ControlFlow::Continue(())
            }
            ProtocolState::LoggedIn => {
                self.on_logged_in(message);
                ControlFlow::Continue(())
            }
        }
    }

    // -----------------------------------------------------------------------
    // AwaitingLogin
    // -----------------------------------------------------------------------

    fn on_awaiting_login(&mut self, message: Message) -> ControlFlow<()> {
        match message {
            Message::Handshake { protocol_version } => {
                self.shared
                    .events
                    .log(format!("Host's protocol version: {protocol_version}"));
                let (require_auth, max) = {
                    let config = self.shared.config.read();
                    (config.require_auth, config.max_version())
                };
                let offer = protocol_version.max(ProtocolVersion::LEGACY);
                let proposed = ProtocolVersion::negotiate(offer, max);
                if let Some(link) = &mut self.link {
                    link.proposed = proposed;
                }

                if !proposed.is_legacy() {
                    self.send(&Message::Handshake {
                        protocol_version: proposed,
                    });
                } else if require_auth {
                    self.shared.events.warning(
                        "Host does not support encryption.\n\
                         Consider disabling \"Require authorization\" under the group \
                         manager settings or ask the host to upgrade MMapper.",
                    );
                    return ControlFlow::Break(());
                } else {
                    self.shared.events.log(
                        "WARNING: Host does not support encryption and your connection is insecure.",
                    );
                    // The legacy login doubles as our handshake.
                    self.send_login();
                }
            }
            Message::RequestLogin => {
                if let Some(link) = &self.link {
                    link.handle.start_client_encryption();
                }
            }
            Message::Ack => {
                self.send(&Message::RequestInfo);
                self.set_state(ProtocolState::AwaitingInfo);
            }
            other => {
                tracing::debug!(kind = %other.kind(), "unexpected message while awaiting login");
            }
        }
        ControlFlow::Continue(())
    }

    /// Decides whether to trust the host, then logs in.
    fn on_encrypted(&mut self, identity: PeerIdentity) -> ControlFlow<()> {
        let secret = identity.secret.clone();
        self.shared.events.log(format!("Host's secret: {secret}"));

        let require_auth = self.shared.config.read().require_auth;
        let trust = &self.shared.trust;
        let allowed = trust.is_allowed(&secret);
        if require_auth && !allowed {
            self.shared
                .events
                .warning(format!("Host's secret is not in your contacts:\n{secret}"));
            return ControlFlow::Break(());
        }
        if require_auth && !trust.certificate_matches(&secret, &identity.certificate_pem) {
            self.shared.events.warning(
                "WARNING: Host's secret has been compromised making the connection insecure.",
            );
            return ControlFlow::Break(());
        }
        if allowed {
            trust.record_login(
                &secret,
                &LoginRecord {
                    name: None,
                    address: self.link.as_ref().and_then(|l| l.peer_addr),
                    certificate_pem: Some(identity.certificate_pem),
                    at: Utc::now(),
                },
            );
        }
        self.send_login();
        ControlFlow::Continue(())
    }

    fn send_login(&self) {
        let Some(link) = &self.link else {
            return;
        };
        let player = self.shared.roster.self_record().to_fields();
        engine::send(
            &link.handle,
            &Message::UpdateChar(CharacterUpdate::login(link.proposed, player)),
        );
    }

    // -----------------------------------------------------------------------
    // AwaitingInfo / LoggedIn
    // -----------------------------------------------------------------------

    fn on_awaiting_info(&mut self, message: Message) {
        match message {
            Message::UpdateChar(update) => self.upsert(update.player),
            Message::StateLoggedIn => {
                self.set_state(ProtocolState::LoggedIn);
                self.attempt = 0;
                self.attempts_left = self.shared.config.read().reconnect_attempts;
                self.shared.events.log("You are now logged in to the group.");
            }
            Message::RequestAck => self.send(&Message::Ack),
            other => {
                tracing::debug!(kind = %other.kind(), "unexpected message while awaiting info");
            }
        }
    }

    fn on_logged_in(&mut self, message: Message) {
        let roster = &self.shared.roster;
        match message {
            Message::AddChar(player) => self.upsert(player),
            Message::UpdateChar(update) => self.upsert(update.player),
            Message::RemoveChar(player) => {
                let name = player.name_or_empty();
                if !name.is_empty() && !roster.is_self_name(name) {
                    engine::accepted(roster.remove_character(name));
                }
            }
            Message::RenameChar { old_name, new_name } => {
                if !roster.is_self_name(&old_name) {
                    engine::accepted(roster.rename_character(old_name, new_name));
                }
            }
            Message::GroupTell { from, text } => {
                tracing::debug!(%from, "group tell arrived");
                self.shared.events.emit(GroupEvent::GroupTell { from, text });
            }
            Message::RequestAck => self.send(&Message::Ack),
            other => {
                tracing::debug!(kind = %other.kind(), "unexpected message while logged in");
            }
        }
    }

    /// Adds a character the host told us about, or updates it if known.
    /// Updates naming self are ignored: only this member changes self.
    ///
    /// The add-or-update choice is left to the roster so that a command
    /// queued behind a selection sees the adds queued before it.
    fn upsert(&self, player: CharacterFields) {
        let roster = &self.shared.roster;
        let name = player.name_or_empty();
        if name.is_empty() || roster.is_self_name(name) {
            return;
        }
        engine::accepted(roster.upsert_character(player));
    }
}
